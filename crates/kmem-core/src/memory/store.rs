//! SQLite-backed record store implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::migrations;
use super::traits::RecordStore;
use crate::error::{Error, Result};
use crate::types::{MemoryRecord, NewRecord, RecordFilter, RecordStatus, StatusCounts, StatusLinks};

pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = "id, workspace_id, topic_id, status, created_at, updated_at, \
                              content_json, superseded_by, merged_from_json";

/// Record store persisting memory records to SQLite.
///
/// Thread-safe via an internal async Mutex; every operation holds the
/// connection for a single statement batch.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode so retrieval readers are never blocked by compaction
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        // Other processes (and the lease handle) write to the same file
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, running migrations on it.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn merged_from_key(ids: &[String]) -> String {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.join("\n")
    }

    fn map_record(row: &Row) -> rusqlite::Result<MemoryRecord> {
        let status: String = row.get(3)?;
        let status = status
            .parse::<RecordStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

        let content_json: String = row.get(6)?;
        let content = serde_json::from_str(&content_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

        let merged_from_json: Option<String> = row.get(8)?;
        let merged_from = merged_from_json
            .map(|json| serde_json::from_str::<Vec<String>>(&json))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

        Ok(MemoryRecord {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            topic_id: row.get(2)?,
            status,
            created_at: from_millis(row.get(4)?),
            updated_at: from_millis(row.get(5)?),
            content,
            superseded_by: row.get(7)?,
            merged_from,
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list_records(
        &self,
        workspace_id: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>> {
        let db = self.db.lock().await;

        let mut sql = format!(
            "SELECT {} FROM memory_records WHERE workspace_id = ?",
            RECORD_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(workspace_id.to_string())];

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref topic_id) = filter.topic_id {
            sql.push_str(" AND topic_id = ?");
            params_vec.push(Box::new(topic_id.clone()));
        }
        sql.push_str(" ORDER BY created_at, id");

        let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = db.prepare(&sql)?;
        let records = stmt
            .query_map(param_refs.as_slice(), Self::map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    async fn get_record(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {} FROM memory_records WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                Self::map_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn create_record(&self, record: NewRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let content_json = serde_json::to_string(&record.content)?;
        let merged_from_json = record.merged_from.as_ref().map(serde_json::to_string).transpose()?;
        let merged_from_key = record.merged_from.as_deref().map(Self::merged_from_key);

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO memory_records (
                 id, workspace_id, topic_id, status, created_at, updated_at,
                 content_json, superseded_by, merged_from_json, merged_from_key
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)",
            params![
                &id,
                &record.workspace_id,
                &record.topic_id,
                record.status.as_str(),
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
                &content_json,
                &merged_from_json,
                &merged_from_key,
            ],
        )?;

        Ok(id)
    }

    async fn update_record_status(
        &self,
        id: &str,
        status: RecordStatus,
        links: &StatusLinks,
    ) -> Result<()> {
        let db = self.db.lock().await;

        if status == RecordStatus::Superseded {
            let target = links.superseded_by.as_deref().ok_or_else(|| {
                Error::validation("superseded_by", "required when superseding a record")
            })?;

            let exists: bool = db.query_row(
                "SELECT EXISTS(SELECT 1 FROM memory_records WHERE id = ?1)",
                params![target],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::ForwardReference {
                    record_id: id.to_string(),
                    target_id: target.to_string(),
                });
            }
        }

        let updated = db.execute(
            "UPDATE memory_records SET status = ?1, superseded_by = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                &links.superseded_by,
                Utc::now().timestamp_millis(),
                id,
            ],
        )?;

        if updated == 0 {
            return Err(Error::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_decision_record(
        &self,
        workspace_id: &str,
        merged_from: &[String],
    ) -> Result<Option<MemoryRecord>> {
        let key = Self::merged_from_key(merged_from);
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!(
                    "SELECT {} FROM memory_records
                     WHERE workspace_id = ?1 AND status = 'decision_record' AND merged_from_key = ?2
                     ORDER BY created_at, id LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![workspace_id, &key],
                Self::map_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn count_by_status(&self, workspace_id: &str) -> Result<StatusCounts> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT status, COUNT(*) FROM memory_records WHERE workspace_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<RecordStatus>() {
                Ok(RecordStatus::Active) => counts.active = count as usize,
                Ok(RecordStatus::Superseded) => counts.superseded = count as usize,
                Ok(RecordStatus::DecisionRecord) => counts.decision_records = count as usize,
                Err(e) => return Err(Error::Other(e)),
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordContent;
    use chrono::Duration;

    fn content(decision: &str) -> RecordContent {
        RecordContent {
            decisions: vec![decision.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let created_at = Utc::now() - Duration::days(3);

        let id = store
            .create_record(NewRecord::active("ws", "plan-014", content("use React"), created_at))
            .await
            .unwrap();

        let record = store.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.topic_id, "plan-014");
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(record.content.decisions, vec!["use React"]);
        assert_eq!(record.created_at.timestamp_millis(), created_at.timestamp_millis());
        assert!(record.merged_from.is_none());

        assert!(store.get_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_order() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let now = Utc::now();

        let late = store
            .create_record(NewRecord::active("ws", "a", content("x"), now - Duration::days(1)))
            .await
            .unwrap();
        let early = store
            .create_record(NewRecord::active("ws", "a", content("y"), now - Duration::days(5)))
            .await
            .unwrap();
        store
            .create_record(NewRecord::active("ws", "b", content("z"), now))
            .await
            .unwrap();
        store
            .create_record(NewRecord::active("other", "a", content("w"), now))
            .await
            .unwrap();

        let all = store.list_records("ws", &RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let topic_a = store
            .list_records("ws", &RecordFilter { status: None, topic_id: Some("a".into()) })
            .await
            .unwrap();
        let ids: Vec<_> = topic_a.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![early.clone(), late.clone()]);

        let active_a = store
            .list_records(
                "ws",
                &RecordFilter { status: Some(RecordStatus::Active), topic_id: Some("a".into()) },
            )
            .await
            .unwrap();
        assert_eq!(active_a.len(), 2);

        let decisions = store
            .list_records("ws", &RecordFilter::status(RecordStatus::DecisionRecord))
            .await
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn test_supersede_requires_existing_target() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let id = store
            .create_record(NewRecord::active("ws", "a", content("x"), Utc::now()))
            .await
            .unwrap();

        let err = store
            .update_record_status(
                &id,
                RecordStatus::Superseded,
                &StatusLinks { superseded_by: Some("nope".into()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForwardReference { .. }));

        let err = store
            .update_record_status(&id, RecordStatus::Superseded, &StatusLinks::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        // Status is unchanged after the rejected updates
        let record = store.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Active);
    }

    #[tokio::test]
    async fn test_status_update_keeps_content() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let member = store
            .create_record(NewRecord::active("ws", "a", content("use React"), Utc::now()))
            .await
            .unwrap();

        let mut decision = NewRecord::active("ws", "a", content("use React"), Utc::now());
        decision.status = RecordStatus::DecisionRecord;
        decision.merged_from = Some(vec![member.clone()]);
        let decision_id = store.create_record(decision).await.unwrap();

        store
            .update_record_status(
                &member,
                RecordStatus::Superseded,
                &StatusLinks { superseded_by: Some(decision_id.clone()) },
            )
            .await
            .unwrap();

        let record = store.get_record(&member).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Superseded);
        assert_eq!(record.superseded_by.as_deref(), Some(decision_id.as_str()));
        assert_eq!(record.content.decisions, vec!["use React"]);

        let err = store
            .update_record_status("missing", RecordStatus::Active, &StatusLinks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_decision_record_by_member_set() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let mut decision = NewRecord::active("ws", "a", RecordContent::default(), Utc::now());
        decision.status = RecordStatus::DecisionRecord;
        decision.merged_from = Some(vec!["m1".into(), "m2".into()]);
        let id = store.create_record(decision).await.unwrap();

        let found = store
            .find_decision_record("ws", &["m2".to_string(), "m1".to_string()])
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(id));

        assert!(store
            .find_decision_record("ws", &["m1".to_string()])
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_decision_record("other", &["m1".to_string(), "m2".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_one_decision_record_per_member_set() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let decision = |workspace: &str, members: [&str; 2]| {
            let mut record =
                NewRecord::active(workspace, "a", RecordContent::default(), Utc::now());
            record.status = RecordStatus::DecisionRecord;
            record.merged_from = Some(members.iter().map(|m| m.to_string()).collect());
            record
        };

        store.create_record(decision("ws", ["m1", "m2"])).await.unwrap();
        let err = store.create_record(decision("ws", ["m2", "m1"])).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        // Same members in another workspace, or a different set, are fine
        store.create_record(decision("other", ["m1", "m2"])).await.unwrap();
        store.create_record(decision("ws", ["m1", "m3"])).await.unwrap();
        assert_eq!(store.count_by_status("ws").await.unwrap().decision_records, 2);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        for topic in ["a", "a", "b"] {
            store
                .create_record(NewRecord::active("ws", topic, RecordContent::default(), Utc::now()))
                .await
                .unwrap();
        }

        let counts = store.count_by_status("ws").await.unwrap();
        assert_eq!(counts, StatusCounts { active: 3, superseded: 0, decision_records: 0 });
        assert_eq!(store.count_by_status("empty").await.unwrap().total(), 0);
    }
}
