//! Ingestion admission for new Active records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::RecordStore;
use crate::error::{Error, Result};
use crate::lock::{IngestionGate, LeaseStore};
use crate::types::{NewRecord, RecordContent};

/// How often a paused writer re-checks a lease held by another process.
const ADMISSION_POLL: Duration = Duration::from_millis(50);

/// Writes captured records into the store, honoring maintenance pauses.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    gate: IngestionGate,
    lease: Option<Arc<dyn LeaseStore>>,
    admission_wait: Option<Duration>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, gate: IngestionGate) -> Self {
        Self {
            store,
            gate,
            lease: None,
            admission_wait: None,
        }
    }

    /// Also hold off while any process holds the workspace's maintenance lease.
    pub fn with_lease(mut self, lease: Arc<dyn LeaseStore>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Give up with [`Error::IngestionPaused`] after waiting this long for a
    /// lease held elsewhere. `None` waits until the lease is gone.
    pub fn with_admission_wait(mut self, wait: Option<Duration>) -> Self {
        self.admission_wait = wait;
        self
    }

    /// Store a new Active record created now.
    pub async fn ingest(
        &self,
        workspace_id: &str,
        topic_id: &str,
        content: RecordContent,
    ) -> Result<String> {
        self.ingest_at(workspace_id, topic_id, content, Utc::now()).await
    }

    /// Store a new Active record with an explicit origin time.
    ///
    /// Waits while compaction holds the workspace's maintenance lock.
    pub async fn ingest_at(
        &self,
        workspace_id: &str,
        topic_id: &str,
        content: RecordContent,
        created_at: DateTime<Utc>,
    ) -> Result<String> {
        if topic_id.trim().is_empty() {
            return Err(Error::validation("topic_id", "cannot be empty"));
        }

        self.gate.wait_until_admitted(workspace_id).await;
        self.wait_for_lease(workspace_id).await?;

        let id = self
            .store
            .create_record(NewRecord::active(workspace_id, topic_id, content, created_at))
            .await?;
        debug!(
            workspace_id = %workspace_id,
            topic_id = %topic_id,
            record_id = %id,
            "Record ingested"
        );
        Ok(id)
    }

    async fn wait_for_lease(&self, workspace_id: &str) -> Result<()> {
        let Some(lease) = &self.lease else {
            return Ok(());
        };

        let started = Instant::now();
        while lease.is_leased(workspace_id)? {
            if self.admission_wait.is_some_and(|wait| started.elapsed() >= wait) {
                return Err(Error::IngestionPaused {
                    workspace_id: workspace_id.to_string(),
                });
            }
            debug!(workspace_id = %workspace_id, "Ingestion waiting for maintenance lease");
            tokio::time::sleep(ADMISSION_POLL).await;
        }
        Ok(())
    }
}
