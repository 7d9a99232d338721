//! Compaction engine.
//!
//! Consolidates clusters of Active records sharing a topic into immutable
//! DecisionRecords while holding the workspace's maintenance lock:
//!
//! ```text
//! acquire lock ─► snapshot ─► recover interrupted clusters ─► detect clusters
//!                                                                   │
//!        ┌──────────────────────── per cluster ◄────────────────────┘
//!        ▼
//!   merge ─► detect conflicts ─► create DecisionRecord ─► supersede members
//!                                        │
//!                                        └─► append conflicts to ledger
//! ```
//!
//! Failures inside one cluster are recorded in the response and the run moves
//! on. Lock and validation failures abort the run before any write.

mod cluster;
mod compactor;
mod conflict;
mod merge;
mod scheduler;
mod supersede;

pub use cluster::{Cluster, ClusterDetector, ClusterPolicy};
pub use compactor::Compactor;
pub use conflict::{ConflictCandidate, ConflictDetector, ConflictRule, PatternConflictDetector};
pub use merge::{MergeCandidate, Merger};
pub use scheduler::{CompactionScheduler, SchedulerState};
pub use supersede::{CommitOutcome, DecisionPreview, SupersedenceWriter};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CompactionConfig;
use crate::error::{Error, Result};
use crate::types::ConflictEntry;

/// Longest accepted workspace id.
const MAX_WORKSPACE_ID_LEN: usize = 128;

/// Upper bound on `min_age_days`, about a century.
const MAX_AGE_DAYS: i64 = 36_500;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of one compaction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionRequest {
    pub workspace_id: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Signed so that malformed input reaches validation.
    pub min_cluster_size: i64,
    pub min_age_days: i64,
    /// Bounded wait for the maintenance lock. Unset falls back to the
    /// compactor's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_ms: Option<u64>,
}

impl CompactionRequest {
    /// A real run with default policy.
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self::from_config(workspace_id, &CompactionConfig::default())
    }

    /// A real run using the configured policy.
    pub fn from_config(workspace_id: impl Into<String>, config: &CompactionConfig) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            dry_run: false,
            min_cluster_size: config.min_cluster_size as i64,
            min_age_days: config.min_age_days as i64,
            lock_wait_ms: config.lock_wait_ms,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn min_cluster_size(mut self, size: i64) -> Self {
        self.min_cluster_size = size;
        self
    }

    pub fn min_age_days(mut self, days: i64) -> Self {
        self.min_age_days = days;
        self
    }

    pub fn lock_wait_ms(mut self, wait_ms: Option<u64>) -> Self {
        self.lock_wait_ms = wait_ms;
        self
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait_ms.map(Duration::from_millis)
    }

    /// Reject malformed parameters. Runs before the lock is touched.
    pub fn validate(&self) -> Result<()> {
        let workspace = self.workspace_id.trim();
        if workspace.is_empty() {
            return Err(Error::validation("workspaceId", "cannot be empty"));
        }
        if self.workspace_id.len() > MAX_WORKSPACE_ID_LEN {
            return Err(Error::validation(
                "workspaceId",
                format!("must be at most {} characters", MAX_WORKSPACE_ID_LEN),
            ));
        }
        if self.min_cluster_size < 1 {
            return Err(Error::validation(
                "minClusterSize",
                format!("must be at least 1, got {}", self.min_cluster_size),
            ));
        }
        if self.min_age_days < 0 {
            return Err(Error::validation(
                "minAgeDays",
                format!("must not be negative, got {}", self.min_age_days),
            ));
        }
        if self.min_age_days > MAX_AGE_DAYS {
            return Err(Error::validation(
                "minAgeDays",
                format!("must be at most {}", MAX_AGE_DAYS),
            ));
        }
        Ok(())
    }

    /// Cluster policy for a validated request.
    pub(crate) fn policy(&self) -> ClusterPolicy {
        ClusterPolicy::new(
            usize::try_from(self.min_cluster_size).unwrap_or(usize::MAX),
            u32::try_from(self.min_age_days).unwrap_or(0),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

/// A conflict as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflict_id: String,
    pub cluster_id: String,
    pub topic_id: String,
    pub conflicting_decisions: [String; 2],
    pub summary_ids: Vec<String>,
}

impl From<&ConflictEntry> for ConflictReport {
    fn from(entry: &ConflictEntry) -> Self {
        Self {
            conflict_id: entry.id.clone(),
            cluster_id: entry.cluster_id.clone(),
            topic_id: entry.topic_id.clone(),
            conflicting_decisions: entry.conflicting_decisions.clone(),
            summary_ids: entry.summary_ids.clone(),
        }
    }
}

/// A cluster whose writes were rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFailure {
    pub cluster_id: String,
    pub topic_id: String,
    pub error: String,
}

/// A detected conflict the ledger failed to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPersistFailure {
    pub conflict_id: String,
    pub cluster_id: String,
    pub error: String,
}

/// Aggregate outcome of one run.
///
/// Succeeded clusters, failed clusters and detected conflicts are counted
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionResponse {
    pub compacted_clusters: usize,
    pub decision_records_created: usize,
    pub conflicts_detected: usize,
    pub superseded_summaries: usize,
    pub conflicts: Vec<ConflictReport>,
    pub failed_clusters: usize,
    #[serde(default)]
    pub cluster_failures: Vec<ClusterFailure>,
    /// Clusters whose interrupted writes were completed by this run.
    #[serde(default)]
    pub resumed_clusters: usize,
    #[serde(default)]
    pub conflict_persist_failures: Vec<ConflictPersistFailure>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub previews: Vec<DecisionPreview>,
}

impl CompactionResponse {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub(crate) fn record_failure(&mut self, cluster: &Cluster, error: &Error) {
        self.failed_clusters += 1;
        self.cluster_failures.push(ClusterFailure {
            cluster_id: cluster.id.clone(),
            topic_id: cluster.topic_id.clone(),
            error: error.to_string(),
        });
    }

    pub(crate) fn record_conflict(&mut self, entry: &ConflictEntry) {
        self.conflicts_detected += 1;
        self.conflicts.push(ConflictReport::from(entry));
    }

    /// Whether every processed cluster and conflict was written.
    pub fn is_clean(&self) -> bool {
        self.failed_clusters == 0 && self.conflict_persist_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(CompactionRequest::new("ws").validate().is_ok());
        assert!(CompactionRequest::new("ws").min_age_days(0).validate().is_ok());

        let cases = [
            CompactionRequest::new(""),
            CompactionRequest::new("   "),
            CompactionRequest::new("w".repeat(129)),
            CompactionRequest::new("ws").min_cluster_size(0),
            CompactionRequest::new("ws").min_cluster_size(-3),
            CompactionRequest::new("ws").min_age_days(-1),
            CompactionRequest::new("ws").min_age_days(MAX_AGE_DAYS + 1),
        ];
        for request in cases {
            let err = request.validate().unwrap_err();
            assert!(err.is_validation(), "expected validation error for {:?}", request);
        }
    }

    #[test]
    fn test_request_from_config() {
        let config = CompactionConfig {
            min_cluster_size: 5,
            min_age_days: 2,
            lock_wait_ms: Some(250),
            ..Default::default()
        };
        let request = CompactionRequest::from_config("ws", &config);
        assert_eq!(request.min_cluster_size, 5);
        assert_eq!(request.min_age_days, 2);
        assert_eq!(request.lock_wait(), Some(Duration::from_millis(250)));
        assert!(!request.dry_run);
    }

    #[test]
    fn test_request_json_shape() {
        let request: CompactionRequest = serde_json::from_str(
            r#"{"workspaceId":"ws","dryRun":true,"minClusterSize":3,"minAgeDays":7}"#,
        )
        .unwrap();
        assert!(request.dry_run);
        assert_eq!(request.lock_wait_ms, None);
    }

    #[test]
    fn test_response_json_shape() {
        let response = CompactionResponse {
            compacted_clusters: 1,
            decision_records_created: 1,
            superseded_summaries: 5,
            ..CompactionResponse::new(false)
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["compactedClusters"], 1);
        assert_eq!(json["decisionRecordsCreated"], 1);
        assert_eq!(json["conflictsDetected"], 0);
        assert_eq!(json["supersededSummaries"], 5);
        assert_eq!(json["failedClusters"], 0);
        assert!(json["conflicts"].as_array().unwrap().is_empty());
        assert!(response.is_clean());
    }

    #[test]
    fn test_dry_run_response_reads_back() {
        let now = chrono::Utc::now();
        let mut response = CompactionResponse::new(true);
        response.previews.push(DecisionPreview {
            cluster_id: "cl-1".into(),
            workspace_id: "ws".into(),
            topic_id: "plan-014".into(),
            status: crate::types::RecordStatus::DecisionRecord,
            created_at: now,
            updated_at: now,
            content: crate::types::RecordContent {
                decisions: vec!["use React".into()],
                ..Default::default()
            },
            merged_from: vec!["a".into(), "b".into()],
        });

        let json = serde_json::to_string(&response).unwrap();
        let parsed: CompactionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.previews[0].content.decisions, vec!["use React"]);
    }
}
