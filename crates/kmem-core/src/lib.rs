//! kmem-core - Core library for kmem
//!
//! This crate holds the personal knowledge-memory store and its compaction
//! engine, shared by the `kmem` CLI and any embedding host:
//!
//! - **types**: Memory records, conflict entries and their lifecycle states
//! - **memory**: Record store trait and the SQLite-backed implementation
//! - **lock**: Maintenance lock and lease coordinating compaction with ingestion
//! - **ledger**: Append-only conflict ledger
//! - **compaction**: Clustering, merging, conflict detection, supersedence and scheduling
//! - **config**: Compaction policy configuration

pub mod compaction;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod types;

// Re-export commonly used types
pub use compaction::{CompactionRequest, CompactionResponse, CompactionScheduler, Compactor};
pub use config::CompactionConfig;
pub use error::{Error, LockAcquisitionFailure, Result};
pub use ledger::{ConflictStore, JsonlConflictStore};
pub use lock::{IngestionControl, IngestionGate, LeaseStore, LockHandle, MaintenanceLock};
pub use memory::{RecordStore, SqliteLeaseStore, SqliteRecordStore};
pub use types::{ConflictEntry, MemoryRecord, RecordContent, RecordStatus};
