//! Core types for kmem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Memory Records
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Written by ingestion, eligible for compaction.
    Active,
    /// Replaced by a decision record; content kept for reference.
    Superseded,
    /// Consolidated output of one compacted cluster.
    DecisionRecord,
}

impl RecordStatus {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::DecisionRecord => "decision_record",
        }
    }

    /// All statuses, in display order.
    pub fn all() -> [RecordStatus; 3] {
        [Self::Active, Self::Superseded, Self::DecisionRecord]
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "decision_record" | "decision" => Ok(Self::DecisionRecord),
            other => Err(format!("unknown record status: {}", other)),
        }
    }
}

/// A reference cited by a record, keyed by its literal target (URL, path, ticket id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Reference {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            label: None,
        }
    }
}

/// Write-once textual content of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordContent {
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub rationale: Vec<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// A stored knowledge fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub workspace_id: String,
    pub topic_id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub content: RecordContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<Vec<String>>,
}

impl MemoryRecord {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Input for creating a record. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub workspace_id: String,
    pub topic_id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content: RecordContent,
    pub merged_from: Option<Vec<String>>,
}

impl NewRecord {
    /// A fresh Active record as produced by the ingestion pipeline.
    pub fn active(
        workspace_id: impl Into<String>,
        topic_id: impl Into<String>,
        content: RecordContent,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            topic_id: topic_id.into(),
            status: RecordStatus::Active,
            created_at,
            updated_at: created_at,
            content,
            merged_from: None,
        }
    }
}

/// Filter for listing records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    pub topic_id: Option<String>,
}

impl RecordFilter {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            topic_id: None,
        }
    }
}

/// Link fields written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusLinks {
    pub superseded_by: Option<String>,
}

/// Record counts by status for one workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub active: usize,
    pub superseded: usize,
    pub decision_records: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.active + self.superseded + self.decision_records
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conflicts
// ─────────────────────────────────────────────────────────────────────────────

/// Human decision recorded against a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub chosen: String,
    pub rejected: String,
    pub resolved_at: DateTime<Utc>,
}

/// A detected contradiction between two decision statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    pub id: String,
    /// Empty for entries written before workspaces were recorded.
    #[serde(default)]
    pub workspace_id: String,
    pub cluster_id: String,
    pub topic_id: String,
    pub conflicting_decisions: [String; 2],
    pub summary_ids: Vec<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub detected_at: DateTime<Utc>,
}
