//! Conflict ledger.
//!
//! A durable, append-only record of detected contradictions, kept apart from
//! the record store so conflict review has its own source of truth. The only
//! mutation an entry ever receives is its resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{ConflictEntry, Resolution};

/// Storage interface for conflict entries.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    /// Append an entry. Returns `false` if an entry with the same id exists.
    async fn append(&self, entry: ConflictEntry) -> Result<bool>;

    /// All entries without a resolution, in append order.
    async fn list_unresolved(&self) -> Result<Vec<ConflictEntry>>;

    /// All entries, in append order.
    async fn list_all(&self) -> Result<Vec<ConflictEntry>>;

    /// Look up an entry by id.
    async fn get(&self, id: &str) -> Result<Option<ConflictEntry>>;

    /// Record the human resolution of an entry.
    async fn mark_resolved(&self, id: &str, resolution: Resolution) -> Result<ConflictEntry>;

    /// Whether an entry with this id has been appended.
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Entries detected in one workspace, optionally including resolved ones.
    async fn list_for_workspace(
        &self,
        workspace_id: &str,
        include_resolved: bool,
    ) -> Result<Vec<ConflictEntry>> {
        let entries = if include_resolved {
            self.list_all().await?
        } else {
            self.list_unresolved().await?
        };
        Ok(entries.into_iter().filter(|e| e.workspace_id == workspace_id).collect())
    }
}

/// One line of the ledger file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LedgerEvent {
    Appended { entry: ConflictEntry },
    Resolved { id: String, resolution: Resolution },
}

/// Conflict ledger stored as a JSON Lines event log.
///
/// Appends and resolutions are both written as new lines; reading folds the
/// log in order. Writers in this process are serialized by an internal lock.
pub struct JsonlConflictStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlConflictStore {
    /// Create a ledger at the given path. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<ConflictEntry>> {
        Ok(self.read_log().await?.0)
    }

    /// Fold the log. The flag reports whether the file ends mid-line.
    async fn read_log(&self) -> Result<(Vec<ConflictEntry>, bool)> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
            Err(e) => return Err(e.into()),
        };
        let torn_tail = !content.is_empty() && !content.ends_with('\n');

        let mut entries: Vec<ConflictEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<LedgerEvent>(line) {
                Ok(event) => event,
                Err(e) => {
                    // A torn final line from an interrupted write is skipped.
                    warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unreadable ledger line"
                    );
                    continue;
                }
            };

            match event {
                LedgerEvent::Appended { entry } => {
                    if !index.contains_key(&entry.id) {
                        index.insert(entry.id.clone(), entries.len());
                        entries.push(entry);
                    }
                }
                LedgerEvent::Resolved { id, resolution } => {
                    if let Some(&i) = index.get(&id) {
                        entries[i].resolved = true;
                        entries[i].resolution = Some(resolution);
                    }
                }
            }
        }

        Ok((entries, torn_tail))
    }

    async fn write_event(&self, event: &LedgerEvent, torn_tail: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut line = String::new();
        if torn_tail {
            // Terminate the torn line so this event starts on its own line.
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(event)?);
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl ConflictStore for JsonlConflictStore {
    async fn append(&self, entry: ConflictEntry) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let (entries, torn_tail) = self.read_log().await?;
        if entries.iter().any(|e| e.id == entry.id) {
            debug!(conflict_id = %entry.id, "Conflict already in ledger");
            return Ok(false);
        }

        let id = entry.id.clone();
        self.write_event(&LedgerEvent::Appended { entry }, torn_tail).await?;
        debug!(conflict_id = %id, "Conflict appended to ledger");
        Ok(true)
    }

    async fn list_unresolved(&self) -> Result<Vec<ConflictEntry>> {
        Ok(self.load().await?.into_iter().filter(|e| !e.resolved).collect())
    }

    async fn list_all(&self) -> Result<Vec<ConflictEntry>> {
        self.load().await
    }

    async fn get(&self, id: &str) -> Result<Option<ConflictEntry>> {
        Ok(self.load().await?.into_iter().find(|e| e.id == id))
    }

    async fn mark_resolved(&self, id: &str, resolution: Resolution) -> Result<ConflictEntry> {
        let _guard = self.write_lock.lock().await;

        let (entries, torn_tail) = self.read_log().await?;
        let mut entry = entries
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;

        if entry.resolved {
            return Err(Error::validation("id", format!("conflict {} is already resolved", id)));
        }

        let [first, second] = &entry.conflicting_decisions;
        for statement in [&resolution.chosen, &resolution.rejected] {
            if statement != first && statement != second {
                return Err(Error::validation(
                    "resolution",
                    format!("'{}' is not one of the conflicting statements", statement),
                ));
            }
        }
        if resolution.chosen == resolution.rejected {
            return Err(Error::validation("resolution", "chosen and rejected must differ"));
        }

        let event = LedgerEvent::Resolved {
            id: id.to_string(),
            resolution: resolution.clone(),
        };
        self.write_event(&event, torn_tail).await?;

        entry.resolved = true;
        entry.resolution = Some(resolution);
        Ok(entry)
    }
}
