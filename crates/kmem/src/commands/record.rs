//! Memory record commands.
//!
//! `add` goes through the ingestion path, so it waits while any kmem process
//! compacts the workspace. Records are never edited from the CLI; status
//! changes only happen through compaction.

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use colored::Colorize;
use kmem_core::memory::Ingestor;
use kmem_core::types::{RecordFilter, Reference};
use kmem_core::{MemoryRecord, RecordContent, RecordStatus, RecordStore};

use crate::cli::{RecordAction, RecordCommand};
use crate::config::Config;
use crate::database::Stores;

/// How long `add` waits for a running compaction before giving up.
const ADMISSION_WAIT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute record command.
pub async fn execute(cmd: RecordCommand, config: &Config) -> Result<()> {
    let stores = Stores::open(config)?;

    match cmd.action {
        RecordAction::Add {
            topic,
            decisions,
            rationale,
            references,
            questions,
            next_steps,
            age_days,
        } => {
            let content = RecordContent {
                decisions,
                rationale,
                references: references.into_iter().map(Reference::new).collect(),
                open_questions: questions,
                next_steps,
            };
            let ingestor = stores.ingestor(Some(ADMISSION_WAIT));
            add(&ingestor, &config.workspace, &topic, content, age_days)
                .await
                .map(|_| ())
        }
        RecordAction::List { status, topic, json } => {
            list(stores.records.as_ref(), &config.workspace, status.as_deref(), topic, json).await
        }
        RecordAction::Show { id, json } => show(stores.records.as_ref(), &id, json).await,
    }
}

async fn add(
    ingestor: &Ingestor,
    workspace_id: &str,
    topic: &str,
    content: RecordContent,
    age_days: Option<u32>,
) -> Result<String> {
    if content == RecordContent::default() {
        bail!("A record needs at least one decision, rationale, reference, question or next step");
    }

    let created_at = Utc::now() - Duration::days(age_days.unwrap_or(0) as i64);
    let id = ingestor
        .ingest_at(workspace_id, topic, content, created_at)
        .await
        .context("Failed to add record")?;

    println!("{} Added record to {}", "✓".green(), topic.cyan());
    println!("  ID: {}", id);
    Ok(id)
}

async fn list(
    store: &dyn RecordStore,
    workspace_id: &str,
    status: Option<&str>,
    topic: Option<String>,
    json: bool,
) -> Result<()> {
    let status = match status {
        Some(s) => Some(s.parse::<RecordStatus>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let filter = RecordFilter { status, topic_id: topic };

    let records = store
        .list_records(workspace_id, &filter)
        .await
        .context("Failed to list records")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No records found".dimmed());
        return Ok(());
    }

    for record in &records {
        println!(
            "{} {} {} {}",
            status_badge(record.status),
            record.id.dimmed(),
            record.topic_id.cyan(),
            record.created_at.format("%Y-%m-%d")
        );
        if let Some(first) = record.content.decisions.first() {
            let more = record.content.decisions.len() - 1;
            if more > 0 {
                println!("    {} (+{} more)", first, more);
            } else {
                println!("    {}", first);
            }
        }
    }
    println!();
    println!("{} record(s)", records.len());
    Ok(())
}

async fn show(store: &dyn RecordStore, id: &str, json: bool) -> Result<()> {
    let Some(record) = store.get_record(id).await.context("Failed to read record")? else {
        bail!("Record not found: {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}

fn status_badge(status: RecordStatus) -> colored::ColoredString {
    match status {
        RecordStatus::Active => "active".green(),
        RecordStatus::Superseded => "superseded".dimmed(),
        RecordStatus::DecisionRecord => "decision".blue().bold(),
    }
}

fn print_record(record: &MemoryRecord) {
    println!("{} {}", record.id.bold(), status_badge(record.status));
    println!("  Topic:   {}", record.topic_id.cyan());
    println!("  Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(by) = &record.superseded_by {
        println!("  Superseded by: {}", by);
    }
    if let Some(members) = &record.merged_from {
        println!("  Merged from: {}", members.join(", "));
    }

    let sections: [(&str, Vec<String>); 5] = [
        ("Decisions", record.content.decisions.clone()),
        ("Rationale", record.content.rationale.clone()),
        (
            "References",
            record.content.references.iter().map(|r| r.target.clone()).collect(),
        ),
        ("Open questions", record.content.open_questions.clone()),
        ("Next steps", record.content.next_steps.clone()),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        println!();
        println!("  {}", title.bold());
        for item in items {
            println!("    - {}", item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmem_core::{IngestionGate, SqliteRecordStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn decision(text: &str) -> RecordContent {
        RecordContent {
            decisions: vec![text.into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_backdates_record() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let ingestor = Ingestor::new(store.clone(), IngestionGate::new());

        let id = add(&ingestor, "ws", "plan-014", decision("use React"), Some(10)).await.unwrap();
        let record = store.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Active);
        assert!(Utc::now() - record.created_at >= Duration::days(10));
    }

    #[tokio::test]
    async fn test_add_rejects_empty_content() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let ingestor = Ingestor::new(store, IngestionGate::new());
        assert!(add(&ingestor, "ws", "plan-014", RecordContent::default(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_add_blocked_while_compaction_holds_lease() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.paths.data_dir = dir.path().to_path_buf();
        let compacting = Stores::open(&config).unwrap();
        let adding = Stores::open(&config).unwrap();
        let ingestor = adding.ingestor(Some(std::time::Duration::from_millis(100)));

        let compactor = compacting.compactor();
        let held = compactor.lock().acquire("ws", None).await.unwrap();
        let blocked = add(&ingestor, "ws", "plan-014", decision("use React"), None).await;
        tokio_test::assert_err!(blocked);
        assert_eq!(adding.records.count_by_status("ws").await.unwrap().total(), 0);

        drop(held);
        tokio_test::assert_ok!(add(&ingestor, "ws", "plan-014", decision("use React"), None).await);
        assert_eq!(adding.records.count_by_status("ws").await.unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        tokio_test::assert_err!(list(&store, "ws", Some("archived"), None, true).await);
        tokio_test::assert_ok!(list(&store, "ws", Some("active"), None, true).await);
    }

    #[tokio::test]
    async fn test_show_missing_record() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        assert!(show(&store, "missing", true).await.is_err());
    }
}
