//! Manual compaction command.
//!
//! Runs one compaction pass for the workspace. Ctrl-C cancels between
//! clusters; clusters already committed stay committed.

use anyhow::{Context, Result};
use colored::Colorize;
use kmem_core::compaction::{CompactionRequest, CompactionResponse, CompactionScheduler};
use tokio::sync::watch;
use tracing::warn;

use crate::cli::CompactArgs;
use crate::config::Config;
use crate::database::Stores;

/// Execute compact command.
pub async fn execute(args: CompactArgs, config: &Config) -> Result<()> {
    let stores = Stores::open(config)?;
    let scheduler =
        CompactionScheduler::new(stores.compactor(), config.compaction.clone(), &config.workspace)
            .context("Failed to set up compaction")?;
    let request = build_request(&args, config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cluster");
            cancel_tx.send_replace(true);
        }
    });

    let result = scheduler.run_manual_with_cancel(&request, cancel_rx).await;
    interrupt.abort();
    let response = result
        .with_context(|| format!("Compaction failed for workspace {}", request.workspace_id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_summary(&request, &response);
    }

    Ok(())
}

/// Merge command-line flags over the configured policy.
fn build_request(args: &CompactArgs, config: &Config) -> CompactionRequest {
    let mut request = CompactionRequest::from_config(&config.workspace, &config.compaction)
        .dry_run(args.dry_run);
    if let Some(size) = args.min_cluster_size {
        request = request.min_cluster_size(size);
    }
    if let Some(days) = args.min_age_days {
        request = request.min_age_days(days);
    }
    if args.wait_ms.is_some() {
        request = request.lock_wait_ms(args.wait_ms);
    }
    request
}

fn print_summary(request: &CompactionRequest, response: &CompactionResponse) {
    if response.dry_run {
        println!(
            "{} Dry run for workspace {} (nothing written)",
            "○".yellow(),
            request.workspace_id.cyan()
        );
    } else {
        println!("{} Compacted workspace {}", "✓".green(), request.workspace_id.cyan());
    }

    println!();
    if response.resumed_clusters > 0 {
        println!(
            "  Clusters compacted:   {} ({} resumed)",
            response.compacted_clusters, response.resumed_clusters
        );
    } else {
        println!("  Clusters compacted:   {}", response.compacted_clusters);
    }
    println!("  Decision records:     {}", response.decision_records_created);
    println!("  Summaries superseded: {}", response.superseded_summaries);
    println!("  Conflicts detected:   {}", response.conflicts_detected);
    let failed = response.failed_clusters.to_string();
    println!(
        "  Failed clusters:      {}",
        if response.failed_clusters > 0 { failed.red() } else { failed.normal() }
    );

    if !response.previews.is_empty() {
        println!();
        println!("{}", "Previews".bold());
        for preview in &response.previews {
            println!(
                "  {} {} ({} records)",
                "●".blue(),
                preview.topic_id.cyan(),
                preview.merged_from.len()
            );
            for decision in &preview.content.decisions {
                println!("      - {}", decision);
            }
        }
    }

    if !response.conflicts.is_empty() {
        println!();
        println!("{}", "Conflicts".bold());
        for conflict in &response.conflicts {
            let [first, second] = &conflict.conflicting_decisions;
            println!(
                "  {} [{}] {}: \"{}\" vs \"{}\"",
                "⚠".yellow(),
                conflict.conflict_id.dimmed(),
                conflict.topic_id.cyan(),
                first,
                second
            );
        }
    }

    for failure in &response.cluster_failures {
        println!(
            "  {} cluster {} ({}): {}",
            "✗".red(),
            failure.cluster_id,
            failure.topic_id,
            failure.error
        );
    }
    for failure in &response.conflict_persist_failures {
        println!(
            "  {} conflict {} was not saved to the ledger: {}",
            "✗".red(),
            failure.conflict_id,
            failure.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CompactArgs {
        CompactArgs {
            dry_run: false,
            min_cluster_size: None,
            min_age_days: None,
            wait_ms: None,
            json: false,
        }
    }

    #[test]
    fn test_request_uses_config_defaults() {
        let mut config = Config::default();
        config.workspace = "notes".into();
        config.compaction.min_cluster_size = 4;
        config.compaction.lock_wait_ms = Some(100);

        let request = build_request(&args(), &config);
        assert_eq!(request.workspace_id, "notes");
        assert_eq!(request.min_cluster_size, 4);
        assert_eq!(request.min_age_days, 7);
        assert_eq!(request.lock_wait_ms, Some(100));
        assert!(!request.dry_run);
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::default();
        let request = build_request(
            &CompactArgs {
                dry_run: true,
                min_cluster_size: Some(2),
                min_age_days: Some(0),
                wait_ms: Some(500),
                json: true,
            },
            &config,
        );
        assert!(request.dry_run);
        assert_eq!(request.min_cluster_size, 2);
        assert_eq!(request.min_age_days, 0);
        assert_eq!(request.lock_wait_ms, Some(500));
    }
}
