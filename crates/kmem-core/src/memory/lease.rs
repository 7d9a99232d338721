//! SQLite-backed maintenance leases.
//!
//! A lease row names the one holder of a workspace's maintenance lock. Every
//! process opening the same database file sees the same rows, so compaction
//! runs and ingestion in separate processes exclude each other.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};

use super::migrations;
use super::store::BUSY_TIMEOUT;
use crate::error::{Error, Result};
use crate::lock::LeaseStore;

/// Lease table access over its own connection.
///
/// Uses a blocking mutex so leases can be released from `Drop`.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    db: Arc<StdMutex<Connection>>,
}

impl SqliteLeaseStore {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory lease table.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(StdMutex::new(conn)),
        })
    }

    fn expiry(ttl: Duration) -> (i64, i64) {
        let now = Utc::now().timestamp_millis();
        (now, now.saturating_add(ttl.as_millis() as i64))
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn try_acquire(&self, workspace_id: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let db = self.db.lock().map_err(|_| Error::LockPoisoned)?;
        let (now, expires_at) = Self::expiry(ttl);

        // An expired lease is taken over; a live one leaves the row untouched.
        let changed = db.execute(
            "INSERT INTO maintenance_leases (workspace_id, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workspace_id) DO UPDATE SET
                 owner = excluded.owner,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE maintenance_leases.expires_at <= excluded.acquired_at",
            params![workspace_id, owner, now, expires_at],
        )?;
        Ok(changed == 1)
    }

    fn renew(&self, workspace_id: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let db = self.db.lock().map_err(|_| Error::LockPoisoned)?;
        let (_, expires_at) = Self::expiry(ttl);
        let changed = db.execute(
            "UPDATE maintenance_leases SET expires_at = ?3 WHERE workspace_id = ?1 AND owner = ?2",
            params![workspace_id, owner, expires_at],
        )?;
        Ok(changed == 1)
    }

    fn release(&self, workspace_id: &str, owner: &str) -> Result<()> {
        let db = self.db.lock().map_err(|_| Error::LockPoisoned)?;
        db.execute(
            "DELETE FROM maintenance_leases WHERE workspace_id = ?1 AND owner = ?2",
            params![workspace_id, owner],
        )?;
        Ok(())
    }

    fn is_leased(&self, workspace_id: &str) -> Result<bool> {
        let db = self.db.lock().map_err(|_| Error::LockPoisoned)?;
        let leased = db.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM maintenance_leases WHERE workspace_id = ?1 AND expires_at > ?2
             )",
            params![workspace_id, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(leased)
    }
}
