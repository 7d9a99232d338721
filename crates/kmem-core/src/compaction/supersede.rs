//! Two-step supersedence writes.
//!
//! Step 1 creates the DecisionRecord. Step 2 moves every member to
//! `Superseded` with `superseded_by` pointing at it. The order is never
//! reversed, so no member can reference a record that does not exist yet.
//! Without multi-record transactions, an interruption between the steps is
//! repaired on the next run by matching `merged_from`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cluster::Cluster;
use super::merge::MergeCandidate;
use crate::error::{Error, Result};
use crate::memory::RecordStore;
use crate::types::{NewRecord, RecordContent, RecordStatus, StatusLinks};

/// A DecisionRecord as it would be committed, without an assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPreview {
    pub cluster_id: String,
    pub workspace_id: String,
    pub topic_id: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub content: RecordContent,
    pub merged_from: Vec<String>,
}

/// What a committed cluster wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub decision_record_id: String,
    /// False when an existing DecisionRecord was found and resumed.
    pub created: bool,
    /// Members moved to `Superseded` by this call.
    pub superseded: usize,
}

/// Writes DecisionRecords and supersedes their members.
#[derive(Clone)]
pub struct SupersedenceWriter {
    store: Arc<dyn RecordStore>,
}

impl SupersedenceWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Build the dry-run preview. Touches no store.
    pub fn preview(
        &self,
        workspace_id: &str,
        cluster: &Cluster,
        candidate: &MergeCandidate,
    ) -> DecisionPreview {
        DecisionPreview {
            cluster_id: cluster.id.clone(),
            workspace_id: workspace_id.to_string(),
            topic_id: candidate.topic_id.clone(),
            status: RecordStatus::DecisionRecord,
            created_at: candidate.created_at,
            updated_at: candidate.updated_at,
            content: candidate.content.clone(),
            merged_from: candidate.merged_from.clone(),
        }
    }

    /// Commit one cluster.
    ///
    /// Reuses a DecisionRecord with the same `merged_from` set if one exists,
    /// then supersedes whatever members are still Active.
    pub async fn commit(
        &self,
        workspace_id: &str,
        cluster: &Cluster,
        candidate: &MergeCandidate,
    ) -> Result<CommitOutcome> {
        let (decision_record_id, created) = match self
            .store
            .find_decision_record(workspace_id, &candidate.merged_from)
            .await?
        {
            Some(existing) => {
                debug!(
                    cluster_id = %cluster.id,
                    decision_record_id = %existing.id,
                    "Resuming existing decision record"
                );
                (existing.id, false)
            }
            None => {
                let id = self
                    .store
                    .create_record(NewRecord {
                        workspace_id: workspace_id.to_string(),
                        topic_id: candidate.topic_id.clone(),
                        status: RecordStatus::DecisionRecord,
                        created_at: candidate.created_at,
                        updated_at: candidate.updated_at,
                        content: candidate.content.clone(),
                        merged_from: Some(candidate.merged_from.clone()),
                    })
                    .await?;
                debug!(
                    cluster_id = %cluster.id,
                    decision_record_id = %id,
                    "Decision record created"
                );
                (id, true)
            }
        };

        let superseded = self
            .supersede_members(&decision_record_id, &cluster.member_ids)
            .await?;

        Ok(CommitOutcome {
            decision_record_id,
            created,
            superseded,
        })
    }

    /// Supersede members that are still Active. Returns how many moved.
    ///
    /// A member already superseded by this decision record is skipped. A
    /// member claimed by a different record is an error.
    pub async fn supersede_members(
        &self,
        decision_record_id: &str,
        member_ids: &[String],
    ) -> Result<usize> {
        let links = StatusLinks {
            superseded_by: Some(decision_record_id.to_string()),
        };

        let mut moved = 0;
        for member_id in member_ids {
            let member = self
                .store
                .get_record(member_id)
                .await?
                .ok_or_else(|| Error::RecordNotFound(member_id.clone()))?;

            match member.status {
                RecordStatus::Active => {
                    self.store
                        .update_record_status(member_id, RecordStatus::Superseded, &links)
                        .await?;
                    moved += 1;
                }
                RecordStatus::Superseded
                    if member.superseded_by.as_deref() == Some(decision_record_id) => {}
                other => {
                    return Err(Error::Other(format!(
                        "record {} is {} and cannot be superseded by {}",
                        member_id, other, decision_record_id
                    )));
                }
            }
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::merge::Merger;
    use crate::memory::SqliteRecordStore;
    use crate::types::{MemoryRecord, RecordFilter};
    use chrono::Duration;

    async fn seed(store: &SqliteRecordStore, count: usize) -> Vec<MemoryRecord> {
        let created_at = Utc::now() - Duration::days(10);
        for i in 0..count {
            let content = RecordContent {
                decisions: vec![format!("decision {}", i)],
                ..Default::default()
            };
            store
                .create_record(NewRecord::active("ws", "plan-014", content, created_at))
                .await
                .unwrap();
        }
        store.list_records("ws", &RecordFilter::default()).await.unwrap()
    }

    fn prepare(records: &[MemoryRecord]) -> (Cluster, MergeCandidate) {
        let cluster = Cluster::new("plan-014", records.iter().map(|r| r.id.clone()).collect());
        let members: Vec<&MemoryRecord> = records.iter().collect();
        let candidate = Merger.merge(&members, Utc::now()).unwrap();
        (cluster, candidate)
    }

    #[tokio::test]
    async fn test_commit_writes_decision_then_supersedes() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let records = seed(&store, 3).await;
        let (cluster, candidate) = prepare(&records);

        let writer = SupersedenceWriter::new(store.clone());
        let outcome = writer.commit("ws", &cluster, &candidate).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.superseded, 3);

        let decision = store.get_record(&outcome.decision_record_id).await.unwrap().unwrap();
        assert_eq!(decision.status, RecordStatus::DecisionRecord);
        assert_eq!(decision.merged_from.as_ref(), Some(&cluster.member_ids));
        assert_eq!(decision.content.decisions.len(), 3);

        for id in &cluster.member_ids {
            let member = store.get_record(id).await.unwrap().unwrap();
            assert_eq!(member.status, RecordStatus::Superseded);
            assert_eq!(member.superseded_by.as_deref(), Some(outcome.decision_record_id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_commit_resumes_existing_decision() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let records = seed(&store, 3).await;
        let (cluster, candidate) = prepare(&records);
        let writer = SupersedenceWriter::new(store.clone());

        // Simulate an interruption after step 1 and one member
        let decision_id = store
            .create_record(NewRecord {
                workspace_id: "ws".into(),
                topic_id: "plan-014".into(),
                status: RecordStatus::DecisionRecord,
                created_at: candidate.created_at,
                updated_at: candidate.updated_at,
                content: candidate.content.clone(),
                merged_from: Some(candidate.merged_from.clone()),
            })
            .await
            .unwrap();
        writer
            .supersede_members(&decision_id, &cluster.member_ids[..1])
            .await
            .unwrap();

        let outcome = writer.commit("ws", &cluster, &candidate).await.unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.decision_record_id, decision_id);
        assert_eq!(outcome.superseded, 2);

        let counts = store.count_by_status("ws").await.unwrap();
        assert_eq!(counts.decision_records, 1);
        assert_eq!(counts.superseded, 3);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_member_claimed_elsewhere_is_an_error() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let records = seed(&store, 2).await;
        let writer = SupersedenceWriter::new(store.clone());

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        writer.supersede_members(&ids[1], &ids[..1]).await.unwrap();

        // Re-running against the same target is a no-op
        assert_eq!(writer.supersede_members(&ids[1], &ids[..1]).await.unwrap(), 0);

        let other = store
            .create_record(NewRecord::active("ws", "t", RecordContent::default(), Utc::now()))
            .await
            .unwrap();
        assert!(writer.supersede_members(&other, &ids[..1]).await.is_err());
    }

    /// Store that never finds an existing DecisionRecord, as when another
    /// writer created one after this writer looked.
    struct StaleLookupStore(SqliteRecordStore);

    #[async_trait::async_trait]
    impl RecordStore for StaleLookupStore {
        async fn list_records(
            &self,
            workspace_id: &str,
            filter: &RecordFilter,
        ) -> Result<Vec<MemoryRecord>> {
            self.0.list_records(workspace_id, filter).await
        }

        async fn get_record(&self, id: &str) -> Result<Option<MemoryRecord>> {
            self.0.get_record(id).await
        }

        async fn create_record(&self, record: NewRecord) -> Result<String> {
            self.0.create_record(record).await
        }

        async fn update_record_status(
            &self,
            id: &str,
            status: RecordStatus,
            links: &StatusLinks,
        ) -> Result<()> {
            self.0.update_record_status(id, status, links).await
        }

        async fn find_decision_record(
            &self,
            _workspace_id: &str,
            _merged_from: &[String],
        ) -> Result<Option<MemoryRecord>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_second_decision_for_same_members_is_rejected() {
        let inner = SqliteRecordStore::open_in_memory().unwrap();
        let records = seed(&inner, 3).await;
        let (cluster, candidate) = prepare(&records);
        let writer = SupersedenceWriter::new(Arc::new(StaleLookupStore(inner.clone())));

        writer.commit("ws", &cluster, &candidate).await.unwrap();
        assert!(writer.commit("ws", &cluster, &candidate).await.is_err());
        assert_eq!(inner.count_by_status("ws").await.unwrap().decision_records, 1);
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let records = seed(&store, 3).await;
        let (cluster, candidate) = prepare(&records);
        let before = store.count_by_status("ws").await.unwrap();

        let preview = SupersedenceWriter::new(store.clone()).preview("ws", &cluster, &candidate);
        assert_eq!(preview.status, RecordStatus::DecisionRecord);
        assert_eq!(preview.merged_from, cluster.member_ids);

        let json = serde_json::to_value(&preview).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["mergedFrom"].as_array().unwrap().len(), 3);

        assert_eq!(store.count_by_status("ws").await.unwrap(), before);
    }
}
