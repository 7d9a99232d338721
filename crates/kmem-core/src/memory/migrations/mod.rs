//! Record store database migrations
//!
//! SQL migrations are embedded as strings and executed when a store is opened.
//! Every statement is idempotent, so stores and lease handles opened on the
//! same file may each run them.

use rusqlite::Connection;

use crate::Result;

/// Memory record tables SQL (001)
pub const MEMORY_RECORDS_SQL: &str = include_str!("001_memory_records.sql");

/// Maintenance lease table and DecisionRecord uniqueness (002)
pub const MAINTENANCE_LEASES_SQL: &str = include_str!("002_maintenance_leases.sql");

/// Run all record store migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(MEMORY_RECORDS_SQL)?;
    conn.execute_batch(MAINTENANCE_LEASES_SQL)?;
    Ok(())
}
