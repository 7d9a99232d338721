//! Opens the record store, lease table and conflict ledger named by the configuration.

use anyhow::{Context, Result};
use kmem_core::compaction::Compactor;
use kmem_core::memory::Ingestor;
use kmem_core::{
    IngestionGate, JsonlConflictStore, MaintenanceLock, SqliteLeaseStore, SqliteRecordStore,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Handles to the stores for one CLI invocation.
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<SqliteRecordStore>,
    pub ledger: Arc<JsonlConflictStore>,
    pub leases: Arc<SqliteLeaseStore>,
    gate: IngestionGate,
    lease_ttl: Duration,
}

impl Stores {
    /// Open the stores, creating directories as needed.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;

        let db_path = config.database_path();
        let records = SqliteRecordStore::open(&db_path)
            .with_context(|| format!("Failed to open record store at {}", db_path.display()))?;
        let leases = SqliteLeaseStore::open(&db_path)
            .with_context(|| format!("Failed to open lease table at {}", db_path.display()))?;
        let ledger = JsonlConflictStore::new(config.ledger_path());

        tracing::debug!(
            database = %db_path.display(),
            ledger = %ledger.path().display(),
            "Stores opened"
        );

        Ok(Self {
            records: Arc::new(records),
            ledger: Arc::new(ledger),
            leases: Arc::new(leases),
            gate: IngestionGate::new(),
            lease_ttl: config.compaction.lease_ttl(),
        })
    }

    /// A compactor over these stores.
    ///
    /// Its lock takes a lease row in the database, so runs in other kmem
    /// processes on the same file are excluded too.
    pub fn compactor(&self) -> Compactor {
        let lock = MaintenanceLock::new(Arc::new(self.gate.clone()))
            .with_lease(self.leases.clone())
            .with_lease_ttl(self.lease_ttl);
        Compactor::new(self.records.clone(), self.ledger.clone(), lock)
    }

    /// An ingestor that holds off while any process compacts the workspace.
    pub fn ingestor(&self, admission_wait: Option<Duration>) -> Ingestor {
        Ingestor::new(self.records.clone(), self.gate.clone())
            .with_lease(self.leases.clone())
            .with_admission_wait(admission_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmem_core::{ConflictStore, RecordContent, RecordStore};
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.paths.data_dir = dir.join("data");
        config
    }

    #[tokio::test]
    async fn test_open_creates_stores() {
        let dir = tempdir().unwrap();
        let stores = Stores::open(&config_in(dir.path())).unwrap();
        assert!(dir.path().join("data").join("kmem.db").exists());

        let counts = stores.records.count_by_status("ws").await.unwrap();
        assert_eq!(counts.total(), 0);
        assert!(stores.ledger.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invocations_share_the_lease() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let compacting = Stores::open(&config).unwrap();
        let other = Stores::open(&config).unwrap();

        let compactor = compacting.compactor();
        let held = compactor.lock().acquire("ws", None).await.unwrap();
        assert!(other.compactor().lock().acquire("ws", None).await.unwrap_err().is_lock_failure());

        let ingestor = other.ingestor(Some(Duration::from_millis(100)));
        assert!(ingestor.ingest("ws", "t", RecordContent::default()).await.is_err());

        drop(held);
        ingestor.ingest("ws", "t", RecordContent::default()).await.unwrap();
        assert_eq!(other.records.count_by_status("ws").await.unwrap().active, 1);
    }
}
