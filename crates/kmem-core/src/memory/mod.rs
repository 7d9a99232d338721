//! Memory record storage.
//!
//! Records are append-only for content and update-only for status and links:
//!
//! ```text
//!   ingestion ──▶ Active ──(compaction)──▶ Superseded ──supersededBy──┐
//!                                                                     ▼
//!                 compaction ──creates──▶ DecisionRecord (mergedFrom = members)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use kmem_core::memory::{Ingestor, RecordStore, SqliteRecordStore};
//!
//! let store = Arc::new(SqliteRecordStore::open("kmem.db")?);
//! let ingestor = Ingestor::new(store.clone(), gate.clone());
//! ingestor.ingest("default", "plan-014", content).await?;
//! ```

mod ingest;
mod lease;
pub mod migrations;
mod store;
mod traits;

pub use ingest::Ingestor;
pub use lease::SqliteLeaseStore;
pub use store::SqliteRecordStore;
pub use traits::RecordStore;
