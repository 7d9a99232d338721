//! Record store trait defining the primitives compaction relies on.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MemoryRecord, NewRecord, RecordFilter, RecordStatus, StatusCounts, StatusLinks};

/// Core trait for memory record storage.
///
/// The store offers single-record create/read/update only; callers must not
/// assume any multi-record transaction. Implementations never modify a
/// record's content after creation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List records of a workspace, ordered by `created_at` then `id`.
    async fn list_records(
        &self,
        workspace_id: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>>;

    /// Retrieve a record by ID.
    async fn get_record(&self, id: &str) -> Result<Option<MemoryRecord>>;

    /// Create a record and return its assigned ID.
    async fn create_record(&self, record: NewRecord) -> Result<String>;

    /// Change a record's status and link fields.
    ///
    /// Moving to `Superseded` requires `links.superseded_by` to name an
    /// existing record.
    async fn update_record_status(
        &self,
        id: &str,
        status: RecordStatus,
        links: &StatusLinks,
    ) -> Result<()>;

    /// Find the decision record whose `merged_from` equals the given id set.
    async fn find_decision_record(
        &self,
        workspace_id: &str,
        merged_from: &[String],
    ) -> Result<Option<MemoryRecord>> {
        let mut wanted = merged_from.to_vec();
        wanted.sort();

        let decisions = self
            .list_records(workspace_id, &RecordFilter::status(RecordStatus::DecisionRecord))
            .await?;

        Ok(decisions.into_iter().find(|record| {
            record.merged_from.as_ref().is_some_and(|ids| {
                let mut ids = ids.clone();
                ids.sort();
                ids == wanted
            })
        }))
    }

    /// Count a workspace's records by status.
    async fn count_by_status(&self, workspace_id: &str) -> Result<StatusCounts> {
        let records = self.list_records(workspace_id, &RecordFilter::default()).await?;
        let mut counts = StatusCounts::default();
        for record in &records {
            match record.status {
                RecordStatus::Active => counts.active += 1,
                RecordStatus::Superseded => counts.superseded += 1,
                RecordStatus::DecisionRecord => counts.decision_records += 1,
            }
        }
        Ok(counts)
    }
}
