//! Error types for kmem-core.

use thiserror::Error;

/// Result type alias using kmem-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why the maintenance lock could not be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisitionFailure {
    #[error("workspace {workspace_id} is locked by another compaction run")]
    Busy { workspace_id: String },

    #[error("timed out after {waited_ms}ms waiting for workspace {workspace_id}")]
    Timeout { workspace_id: String, waited_ms: u64 },
}

/// Core error types for kmem operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record {record_id} cannot reference missing record {target_id}")]
    ForwardReference { record_id: String, target_id: String },

    // Compaction errors
    #[error("Maintenance lock unavailable: {0}")]
    LockAcquisition(#[from] LockAcquisitionFailure),

    #[error("Invalid value for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Write failed for cluster {cluster_id}: {message}")]
    ClusterWrite { cluster_id: String, message: String },

    #[error("Maintenance lease for workspace {workspace_id} expired and was taken over")]
    LeaseLost { workspace_id: String },

    #[error("Ingestion for workspace {workspace_id} is paused by maintenance")]
    IngestionPaused { workspace_id: String },

    #[error("Compaction cancelled after {committed_clusters} committed clusters")]
    Cancelled { committed_clusters: usize },

    // Conflict ledger errors
    #[error("Conflict ledger error: {0}")]
    ConflictStore(String),

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wrap a store failure that happened while writing one cluster
    pub fn cluster_write(cluster_id: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::ClusterWrite {
            cluster_id: cluster_id.into(),
            message: source.to_string(),
        }
    }

    /// Check if this error is a lock acquisition failure
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, Self::LockAcquisition(_))
    }

    /// Check if this error is a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
