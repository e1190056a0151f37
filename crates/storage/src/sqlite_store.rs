use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use coop_backup_core::{
    BackupRecord, BackupStatus, BackupType, NewBackupRecord, RecordMetadata, RecordOrder, RecordQuery,
    RecordTransition,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::store::RecordStore;

const SELECT_COLUMNS: &str = "SELECT id, filename, file_path, file_size_bytes, backup_type, status,
     metadata_json, created_by, created_at, completed_at, error_message FROM backups";

/// SQLite-backed record store. Each method opens a fresh connection.
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create state dir: {}", parent.display()))?;
        }
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("open backup record db")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backups (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size_bytes INTEGER,
                backup_type TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_by TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS backups_created_at ON backups (created_at);",
        )
        .context("create backups table")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, new_record: NewBackupRecord) -> Result<BackupRecord> {
        let record = new_record.in_progress(Uuid::new_v4());
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open backup record db")?;
            conn.execute(
                "INSERT INTO backups (id, filename, file_path, file_size_bytes, backup_type, status,
                 metadata_json, created_by, created_at, completed_at, error_message)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, ?8, NULL, NULL)",
                params![
                    record.id.to_string(),
                    record.filename,
                    record.file_path.to_string_lossy(),
                    record.backup_type.as_str(),
                    record.status.as_str(),
                    serde_json::to_string(&record.metadata)?,
                    record.created_by,
                    format_ts(record.created_at),
                ],
            )
            .context("insert backup record")?;
            Ok(record)
        })
        .await?
    }

    async fn update(&self, id: Uuid, transition: RecordTransition) -> Result<Option<BackupRecord>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).context("open backup record db")?;
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1 AND status = 'in_progress'"),
                    [id.to_string()],
                    row_to_record,
                )
                .optional()?;
            let Some(mut record) = current else {
                return Ok(None);
            };

            transition.apply(&mut record);
            let size = record.file_size_bytes.map(i64::try_from).transpose()?;
            tx.execute(
                "UPDATE backups SET status = ?2, file_size_bytes = ?3, metadata_json = ?4,
                 completed_at = ?5, error_message = ?6
                 WHERE id = ?1 AND status = 'in_progress'",
                params![
                    id.to_string(),
                    record.status.as_str(),
                    size,
                    serde_json::to_string(&record.metadata)?,
                    record.completed_at.map(format_ts),
                    record.error_message,
                ],
            )
            .context("update backup record")?;
            tx.commit()?;
            Ok(Some(record))
        })
        .await?
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open backup record db")?;
            let found = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    [id.to_string()],
                    row_to_record,
                )
                .optional()?;
            Ok(found)
        })
        .await?
    }

    async fn find_many(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>> {
        let db_path = self.db_path.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open backup record db")?;

            let mut filters = Vec::new();
            let mut values = Vec::new();
            if let Some(backup_type) = query.backup_type {
                values.push(backup_type.as_str());
                filters.push(format!("backup_type = ?{}", values.len()));
            }
            if let Some(status) = query.status {
                values.push(status.as_str());
                filters.push(format!("status = ?{}", values.len()));
            }

            let mut sql = SELECT_COLUMNS.to_owned();
            if !filters.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&filters.join(" AND "));
            }
            sql.push_str(match query.order {
                RecordOrder::NewestFirst => " ORDER BY created_at DESC, seq DESC",
                RecordOrder::OldestFirst => " ORDER BY created_at ASC, seq ASC",
            });
            let limit = query.take.map(|n| n as i64).unwrap_or(-1);
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.skip));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_record)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open backup record db")?;
            let removed = conn
                .execute("DELETE FROM backups WHERE id = ?1", [id.to_string()])
                .context("delete backup record")?;
            Ok(removed > 0)
        })
        .await?
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
    let size: Option<i64> = row.get(3)?;
    let metadata_json: String = row.get(6)?;
    let completed_at: Option<String> = row.get(9)?;
    Ok(BackupRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| to_sql_err(0, e))?,
        filename: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        file_size_bytes: size
            .map(u64::try_from)
            .transpose()
            .map_err(|e| to_sql_err(3, e))?,
        backup_type: row
            .get::<_, String>(4)?
            .parse::<BackupType>()
            .map_err(|e| to_sql_err(4, e))?,
        status: row
            .get::<_, String>(5)?
            .parse::<BackupStatus>()
            .map_err(|e| to_sql_err(5, e))?,
        metadata: serde_json::from_str::<RecordMetadata>(&metadata_json).map_err(|e| to_sql_err(6, e))?,
        created_by: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?).map_err(|e| to_sql_err(8, e))?,
        completed_at: completed_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| to_sql_err(9, e))?,
        error_message: row.get(10)?,
    })
}

/// Fixed-width so lexical order in SQLite matches chronological order.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn to_sql_err(
    column: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, e.into())
}
