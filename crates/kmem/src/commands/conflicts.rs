//! Conflict review commands.
//!
//! Reads and resolves the current workspace's entries in the conflict ledger.
//! Resolution is the only change an entry ever receives.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use colored::Colorize;
use kmem_core::types::Resolution;
use kmem_core::{ConflictEntry, ConflictStore};

use crate::cli::{ConflictsAction, ConflictsCommand};
use crate::config::Config;
use crate::database::Stores;

/// Execute conflicts command.
pub async fn execute(cmd: ConflictsCommand, config: &Config) -> Result<()> {
    let stores = Stores::open(config)?;
    let ledger: &dyn ConflictStore = stores.ledger.as_ref();

    match cmd.action {
        ConflictsAction::List { all, json } => list(ledger, &config.workspace, all, json).await,
        ConflictsAction::Resolve { id, chosen, rejected } => {
            resolve(ledger, &config.workspace, &id, chosen, rejected).await
        }
    }
}

async fn list(ledger: &dyn ConflictStore, workspace_id: &str, all: bool, json: bool) -> Result<()> {
    let entries = ledger
        .list_for_workspace(workspace_id, all)
        .await
        .context("Failed to read conflict ledger")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No conflicts".dimmed());
        return Ok(());
    }

    for entry in &entries {
        print_entry(entry);
    }
    println!();
    println!("{} conflict(s)", entries.len());
    Ok(())
}

fn print_entry(entry: &ConflictEntry) {
    let marker = if entry.resolved { "✓".green() } else { "⚠".yellow() };
    let [first, second] = &entry.conflicting_decisions;

    println!(
        "{} {} {} ({})",
        marker,
        entry.id.bold(),
        entry.topic_id.cyan(),
        entry.detected_at.format("%Y-%m-%d %H:%M")
    );
    println!("    A: {}", first);
    println!("    B: {}", second);
    println!("    Records: {}", entry.summary_ids.join(", ").dimmed());
    if let Some(resolution) = &entry.resolution {
        println!(
            "    Chose \"{}\" over \"{}\" on {}",
            resolution.chosen.green(),
            resolution.rejected,
            resolution.resolved_at.format("%Y-%m-%d")
        );
    }
}

async fn resolve(
    ledger: &dyn ConflictStore,
    workspace_id: &str,
    id: &str,
    chosen: String,
    rejected: String,
) -> Result<()> {
    let Some(existing) = ledger.get(id).await.context("Failed to read conflict ledger")? else {
        bail!("Conflict not found: {}", id);
    };
    if existing.workspace_id != workspace_id {
        bail!(
            "Conflict {} belongs to workspace {}, not {}",
            id,
            existing.workspace_id,
            workspace_id
        );
    }

    let resolution = Resolution {
        chosen,
        rejected,
        resolved_at: Utc::now(),
    };

    let entry = ledger
        .mark_resolved(id, resolution)
        .await
        .with_context(|| format!("Failed to resolve conflict {}", id))?;

    println!("{} Resolved {}", "✓".green(), entry.id);
    print_entry(&entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmem_core::JsonlConflictStore;
    use tempfile::tempdir;

    fn entry() -> ConflictEntry {
        ConflictEntry {
            id: "conf-1".into(),
            workspace_id: "ws".into(),
            cluster_id: "cl-1".into(),
            topic_id: "plan-014".into(),
            conflicting_decisions: ["use React".into(), "do not use React".into()],
            summary_ids: vec!["a".into(), "b".into()],
            resolved: false,
            resolution: None,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_then_list() {
        let dir = tempdir().unwrap();
        let ledger = JsonlConflictStore::new(dir.path().join("conflicts.jsonl"));
        ledger.append(entry()).await.unwrap();

        resolve(&ledger, "ws", "conf-1", "use React".into(), "do not use React".into())
            .await
            .unwrap();
        assert!(ledger.list_unresolved().await.unwrap().is_empty());

        list(&ledger, "ws", true, true).await.unwrap();
        assert!(resolve(&ledger, "ws", "conf-1", "use React".into(), "do not use React".into())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve_checks_workspace() {
        let dir = tempdir().unwrap();
        let ledger = JsonlConflictStore::new(dir.path().join("conflicts.jsonl"));
        ledger.append(entry()).await.unwrap();

        let err = resolve(&ledger, "notes", "conf-1", "use React".into(), "do not use React".into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("belongs to workspace ws"));
        assert_eq!(ledger.list_for_workspace("ws", false).await.unwrap().len(), 1);
        assert!(ledger.list_for_workspace("notes", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_conflict() {
        let dir = tempdir().unwrap();
        let ledger = JsonlConflictStore::new(dir.path().join("conflicts.jsonl"));
        assert!(resolve(&ledger, "ws", "missing", "a".into(), "b".into()).await.is_err());
    }
}
