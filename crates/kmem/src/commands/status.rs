//! Workspace status command.
//!
//! Shows record counts by status, unresolved conflicts and the compaction
//! policy in effect. Supports JSON output for programmatic use.

use anyhow::{Context, Result};
use colored::Colorize;
use kmem_core::types::StatusCounts;
use kmem_core::{CompactionConfig, ConflictStore, RecordStore};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::database::Stores;

/// Workspace status for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub records: StatusCounts,
    pub unresolved_conflicts: usize,
    pub database_path: String,
    pub ledger_path: String,
    pub compaction: CompactionConfig,
}

pub async fn execute(json: bool, config: &Config) -> Result<()> {
    let stores = Stores::open(config)?;
    let status = gather_status(stores.records.as_ref(), stores.ledger.as_ref(), config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    Ok(())
}

async fn gather_status(
    records: &dyn RecordStore,
    ledger: &dyn ConflictStore,
    config: &Config,
) -> Result<WorkspaceStatus> {
    let counts = records
        .count_by_status(&config.workspace)
        .await
        .context("Failed to count records")?;
    let unresolved = ledger
        .list_for_workspace(&config.workspace, false)
        .await
        .context("Failed to read conflict ledger")?
        .len();

    Ok(WorkspaceStatus {
        workspace_id: config.workspace.clone(),
        records: counts,
        unresolved_conflicts: unresolved,
        database_path: config.database_path().display().to_string(),
        ledger_path: config.ledger_path().display().to_string(),
        compaction: config.compaction.clone(),
    })
}

fn print_status(status: &WorkspaceStatus) {
    println!("{} {}", "Workspace".bold(), status.workspace_id.cyan());
    println!();
    println!("  {}", "Records".bold());
    println!("    Active:           {}", status.records.active.to_string().green());
    println!("    Superseded:       {}", status.records.superseded);
    println!("    Decision records: {}", status.records.decision_records.to_string().blue());
    println!("    Total:            {}", status.records.total());

    println!();
    let conflicts = status.unresolved_conflicts.to_string();
    println!(
        "  {} {}",
        "Unresolved conflicts:".bold(),
        if status.unresolved_conflicts > 0 { conflicts.yellow() } else { conflicts.normal() }
    );

    println!();
    println!("  {}", "Compaction".bold());
    println!("    Min cluster size: {}", status.compaction.min_cluster_size);
    println!("    Min age:          {} day(s)", status.compaction.min_age_days);
    if status.compaction.auto_interval_days > 0 {
        println!("    Automatic:        every {} day(s)", status.compaction.auto_interval_days);
    } else {
        println!("    Automatic:        {}", "disabled".dimmed());
    }

    println!();
    println!("  {} {}", "Database:".dimmed(), status.database_path.dimmed());
    println!("  {} {}", "Ledger:".dimmed(), status.ledger_path.dimmed());
}
