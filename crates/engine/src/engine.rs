use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use coop_backup_core::{
    snapshot_filename, BackupRecord, BackupStatus, BackupType, NewBackupRecord, RecordMetadata,
    RecordQuery, RecordTransition, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION,
};
use coop_backup_storage::{EntityRepository, RecordStore};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collector::Collector;
use crate::config::EngineConfig;
use crate::error::BackupError;
use crate::restore::{
    check_media_paths, restore_entities, restore_log_layout, restore_media_layout, RestoreSummary,
};
use crate::writer::{read_snapshot, write_snapshot, WrittenSnapshot};

const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateOptions {
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    #[serde(default)]
    pub include_media: bool,
    #[serde(default)]
    pub include_logs: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateOptions {
    pub fn new(backup_type: BackupType) -> Self {
        Self {
            backup_type,
            include_media: false,
            include_logs: false,
            created_by: None,
            description: None,
        }
    }

    fn validate(&self) -> Result<(), BackupError> {
        if let Some(actor) = &self.created_by {
            if actor.trim().is_empty() {
                return Err(BackupError::Validation("created_by must not be blank".into()));
            }
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(BackupError::Validation(format!(
                    "description is longer than {MAX_DESCRIPTION_LEN} characters"
                )));
            }
            if description.chars().any(|c| c.is_control() && c != '\n') {
                return Err(BackupError::Validation(
                    "description contains control characters".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestoreOptions {
    pub backup_id: Uuid,
    #[serde(default)]
    pub include_media: bool,
    #[serde(default)]
    pub include_logs: bool,
}

/// Drives snapshot creation, restore and deletion, and owns the lifecycle of
/// every [`BackupRecord`].
///
/// Construct once and share (e.g. behind an `Arc`). Mutating operations are
/// serialized by an internal lock; reads are not.
pub struct BackupEngine {
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) entities: Arc<dyn EntityRepository>,
    pub(crate) config: EngineConfig,
    pub(crate) op_lock: Mutex<()>,
}

impl BackupEngine {
    pub fn new(
        config: EngineConfig,
        records: Arc<dyn RecordStore>,
        entities: Arc<dyn EntityRepository>,
    ) -> Result<Self, BackupError> {
        if config.max_backups == 0 {
            return Err(BackupError::Validation("max_backups must be at least 1".into()));
        }
        Ok(Self {
            records,
            entities,
            config,
            op_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Takes a snapshot and returns the id of its record, which is COMPLETED
    /// on success and FAILED (with the error message) otherwise.
    pub async fn create_backup(&self, options: CreateOptions) -> Result<Uuid, BackupError> {
        options.validate()?;
        let _guard = self.op_lock.lock().await;
        self.create_locked(options).await
    }

    pub(crate) async fn create_locked(&self, options: CreateOptions) -> Result<Uuid, BackupError> {
        let started_at = Utc::now();
        let nonce = Uuid::new_v4().simple().to_string();
        let filename = snapshot_filename(options.backup_type, started_at, &nonce[..8]);
        let file_path = self.config.backup_dir.join(&filename);

        let record = self
            .records
            .create(NewBackupRecord {
                filename,
                file_path,
                backup_type: options.backup_type,
                metadata: RecordMetadata {
                    include_media: options.include_media,
                    include_logs: options.include_logs,
                    description: options.description.clone(),
                    checksum: None,
                },
                created_by: options.created_by.clone(),
                created_at: started_at,
            })
            .await
            .map_err(BackupError::Store)?;
        info!(backup_id = %record.id, backup_type = %record.backup_type, "backup started");

        let outcome = match self.take_snapshot(&record, &options, started_at).await {
            Ok(written) => self
                .finish(
                    record.id,
                    RecordTransition::Completed {
                        file_size_bytes: written.size_bytes,
                        checksum: written.checksum.clone(),
                        completed_at: Utc::now(),
                    },
                )
                .await
                .map(|_| written),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(written) => {
                info!(
                    backup_id = %record.id,
                    size_bytes = written.size_bytes,
                    file = %record.filename,
                    "backup completed"
                );
                if let Err(e) = self.cleanup_locked().await {
                    warn!(error = %e, max_backups = self.config.max_backups, "retention cleanup failed");
                }
                Ok(record.id)
            }
            Err(err) => {
                error!(backup_id = %record.id, error = %err, "backup failed");
                remove_file_if_present(&record);
                let failed = RecordTransition::Failed {
                    error_message: err.to_string(),
                };
                if let Err(mark_err) = self.finish(record.id, failed).await {
                    error!(backup_id = %record.id, error = %mark_err, "could not mark backup as failed");
                }
                Err(err)
            }
        }
    }

    async fn take_snapshot(
        &self,
        record: &BackupRecord,
        options: &CreateOptions,
        started_at: DateTime<Utc>,
    ) -> Result<WrittenSnapshot, BackupError> {
        let metadata = SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            timestamp: started_at,
            schema_version: self.config.schema_version.clone(),
            environment: self.config.environment.clone(),
            backup_type: options.backup_type,
            created_by: options.created_by.clone(),
            description: options.description.clone(),
        };
        let payload = Collector::new(self.entities.as_ref(), &self.config)
            .collect(metadata, options.include_media, options.include_logs)
            .await?;
        debug!(backup_id = %record.id, kinds = payload.entities.len(), "collection finished");
        write_snapshot(&payload, &record.file_path)
    }

    async fn finish(
        &self,
        id: Uuid,
        transition: RecordTransition,
    ) -> Result<BackupRecord, BackupError> {
        let target = transition.target_status();
        self.records
            .update(id, transition)
            .await
            .map_err(BackupError::Store)?
            .ok_or_else(|| {
                BackupError::Store(anyhow!(
                    "backup {id} was no longer in progress when marking it {target}"
                ))
            })
    }

    /// Replaces the portal's data with the contents of a COMPLETED snapshot.
    ///
    /// Nothing is mutated unless the record, file, checksum and envelope all
    /// check out. The record itself is never modified.
    ///
    /// Media and log layouts are recreated after the entities are committed;
    /// failures there land in [`RestoreSummary::layout_errors`] and do not
    /// fail the restore.
    pub async fn restore_backup(&self, options: RestoreOptions) -> Result<RestoreSummary, BackupError> {
        let _guard = self.op_lock.lock().await;
        let id = options.backup_id;

        let record = self
            .records
            .find_by_id(id)
            .await
            .map_err(BackupError::Store)?
            .ok_or(BackupError::NotFound(id))?;
        if record.status != BackupStatus::Completed {
            return Err(BackupError::InvalidState {
                id,
                status: record.status,
            });
        }
        if !record.file_path.is_file() {
            return Err(BackupError::MissingFile {
                id,
                path: record.file_path.clone(),
            });
        }

        let (payload, checksum) = read_snapshot(&record.file_path)
            .map_err(|e| BackupError::restore("reading snapshot", e))?;
        if let Some(expected) = &record.metadata.checksum {
            if *expected != checksum {
                return Err(BackupError::restore(
                    "verifying snapshot",
                    anyhow!("checksum mismatch: record has {expected}, file has {checksum}"),
                ));
            }
        }
        if payload.metadata.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(BackupError::restore(
                "reading snapshot",
                anyhow!(
                    "unsupported snapshot format version {}",
                    payload.metadata.format_version
                ),
            ));
        }
        if !payload.metadata.backup_type.includes_data() {
            return Err(BackupError::Validation(format!(
                "backup {id} is schema-only and holds no data to restore"
            )));
        }
        if options.include_media {
            check_media_paths(&payload)?;
        }

        info!(backup_id = %id, "restore started");
        let (restored, atomic) = restore_entities(self.entities.as_ref(), &payload).await?;

        // Entities are committed at this point; layout problems are reported,
        // not returned.
        let mut missing_media = Vec::new();
        let mut layout_errors = Vec::new();
        if options.include_media {
            match &self.config.media_root {
                Some(root) => match restore_media_layout(&payload, root) {
                    Ok(missing) => missing_media = missing,
                    Err(e) => {
                        warn!(backup_id = %id, error = %e, "media layout not recreated");
                        layout_errors.push(e.to_string());
                    }
                },
                None => warn!(backup_id = %id, "media restore requested but no media root is configured"),
            }
        }
        if options.include_logs {
            match &self.config.log_dir {
                Some(dir) => {
                    if let Err(e) = restore_log_layout(&payload, dir) {
                        warn!(backup_id = %id, error = %e, "log directory not recreated");
                        layout_errors.push(e.to_string());
                    }
                }
                None => warn!(backup_id = %id, "log restore requested but no log directory is configured"),
            }
        }

        let total: usize = restored.values().sum();
        info!(backup_id = %id, rows = total, atomic, missing_media = missing_media.len(), "restore completed");
        Ok(RestoreSummary {
            backup_id: id,
            restored,
            atomic,
            missing_media,
            layout_errors,
        })
    }

    /// Removes a snapshot file and its record. A file that is already gone is
    /// not an error; an unknown id is [`BackupError::NotFound`].
    pub async fn delete_backup(&self, id: Uuid) -> Result<(), BackupError> {
        let _guard = self.op_lock.lock().await;
        self.delete_locked(id).await
    }

    pub(crate) async fn delete_locked(&self, id: Uuid) -> Result<(), BackupError> {
        let record = self
            .records
            .find_by_id(id)
            .await
            .map_err(BackupError::Store)?
            .ok_or(BackupError::NotFound(id))?;

        match std::fs::remove_file(&record.file_path) {
            Ok(()) => debug!(backup_id = %id, "snapshot file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(backup_id = %id, "snapshot file already absent")
            }
            Err(e) => {
                return Err(BackupError::write(
                    &record.file_path,
                    anyhow::Error::new(e).context("remove snapshot"),
                ))
            }
        }

        self.records.delete(id).await.map_err(BackupError::Store)?;
        info!(backup_id = %id, "backup deleted");
        Ok(())
    }

    /// Newest first.
    pub async fn get_backups(&self, limit: usize) -> Result<Vec<BackupRecord>, BackupError> {
        self.records
            .find_many(&RecordQuery::newest(limit))
            .await
            .map_err(BackupError::Store)
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>, BackupError> {
        self.records.find_by_id(id).await.map_err(BackupError::Store)
    }

    /// Marks records left IN_PROGRESS by a process that died mid-backup as
    /// FAILED and removes any file they left behind.
    pub async fn recover_interrupted(&self) -> Result<usize, BackupError> {
        let _guard = self.op_lock.lock().await;
        let stuck = self
            .records
            .find_many(&RecordQuery {
                status: Some(BackupStatus::InProgress),
                ..RecordQuery::default()
            })
            .await
            .map_err(BackupError::Store)?;

        let mut recovered = 0;
        for record in stuck {
            remove_file_if_present(&record);
            let failed = RecordTransition::Failed {
                error_message: "interrupted before completion".into(),
            };
            if self.records.update(record.id, failed).await.map_err(BackupError::Store)?.is_some() {
                warn!(backup_id = %record.id, "marked interrupted backup as failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

fn remove_file_if_present(record: &BackupRecord) {
    match std::fs::remove_file(&record.file_path) {
        Ok(()) => debug!(backup_id = %record.id, "removed snapshot of unfinished backup"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(backup_id = %record.id, error = %e, "could not remove snapshot of unfinished backup"),
    }
}
