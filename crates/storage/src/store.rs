use anyhow::Result;
use coop_backup_core::{BackupRecord, NewBackupRecord, RecordQuery, RecordTransition};
use uuid::Uuid;

/// BackupRecord persistence, implemented by both SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record in the `InProgress` state.
    async fn create(&self, new_record: NewBackupRecord) -> Result<BackupRecord>;

    /// Move an `InProgress` record to a terminal state.
    ///
    /// Returns `None` when no record with `id` is currently in progress; terminal
    /// records are never rewritten.
    async fn update(&self, id: Uuid, transition: RecordTransition) -> Result<Option<BackupRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BackupRecord>>;

    /// Records matching `query`, ordered by creation time (ties broken by insertion order).
    async fn find_many(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}
