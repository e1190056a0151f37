use std::path::PathBuf;

use anyhow::{Context, Result};
use coop_backup_core::{
    BackupRecord, BackupStatus, BackupType, NewBackupRecord, RecordMetadata, RecordOrder,
    RecordQuery, RecordTransition,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::store::RecordStore;

const SELECT_COLUMNS: &str = "SELECT id, filename, file_path, file_size_bytes, backup_type, status,
     metadata_json, created_by, created_at, completed_at, error_message FROM backups";

/// Postgres-backed record store.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backups (
                seq BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size_bytes BIGINT,
                backup_type TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                created_by TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                error_message TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backups table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS backups_created_at ON backups (created_at)")
            .execute(&self.pool)
            .await
            .context("create backups index")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create(&self, new_record: NewBackupRecord) -> Result<BackupRecord> {
        let record = new_record.in_progress(Uuid::new_v4());
        sqlx::query(
            "INSERT INTO backups (id, filename, file_path, backup_type, status, metadata_json,
             created_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(record.file_path.to_string_lossy().into_owned())
        .bind(record.backup_type.as_str())
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(&record.created_by)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("insert backup record")?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, transition: RecordTransition) -> Result<Option<BackupRecord>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 AND status = 'in_progress' FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = pg_row_to_record(&row)?;
        transition.apply(&mut record);
        let size = record.file_size_bytes.map(i64::try_from).transpose()?;
        sqlx::query(
            "UPDATE backups SET status = $2, file_size_bytes = $3, metadata_json = $4,
             completed_at = $5, error_message = $6
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(id)
        .bind(record.status.as_str())
        .bind(size)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(record.completed_at)
        .bind(&record.error_message)
        .execute(&mut *tx)
        .await
        .context("update backup record")?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(pg_row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_many(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        builder.push(" WHERE TRUE");
        if let Some(backup_type) = query.backup_type {
            builder.push(" AND backup_type = ").push_bind(backup_type.as_str());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(match query.order {
            RecordOrder::NewestFirst => " ORDER BY created_at DESC, seq DESC",
            RecordOrder::OldestFirst => " ORDER BY created_at ASC, seq ASC",
        });
        if let Some(take) = query.take {
            builder.push(" LIMIT ").push_bind(i64::try_from(take)?);
        }
        builder.push(" OFFSET ").push_bind(i64::try_from(query.skip)?);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_record).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete backup record")?;
        Ok(result.rows_affected() > 0)
    }
}

fn pg_row_to_record(row: &sqlx::postgres::PgRow) -> Result<BackupRecord> {
    let backup_type: String = row.get("backup_type");
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let file_path: String = row.get("file_path");
    let size: Option<i64> = row.get("file_size_bytes");

    Ok(BackupRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        file_path: PathBuf::from(file_path),
        file_size_bytes: size.map(u64::try_from).transpose()?,
        backup_type: backup_type.parse::<BackupType>().map_err(anyhow::Error::msg)?,
        status: status.parse::<BackupStatus>().map_err(anyhow::Error::msg)?,
        metadata: serde_json::from_str::<RecordMetadata>(&metadata_json)
            .context("parse metadata_json")?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
    })
}
