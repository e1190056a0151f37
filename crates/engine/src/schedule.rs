use chrono::{TimeDelta, Utc};
use coop_backup_core::{BackupStatus, BackupType, RecordQuery};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{BackupEngine, CreateOptions};
use crate::error::BackupError;

pub const SCHEDULED_DESCRIPTION: &str = "Scheduled daily backup";

impl BackupEngine {
    /// Staleness check meant to be invoked periodically by an external job
    /// runner. Takes a FULL backup (with media, without logs) when the newest
    /// completed FULL backup is older than the schedule interval or missing.
    pub async fn schedule_backups(&self) -> Result<Option<Uuid>, BackupError> {
        let _guard = self.op_lock.lock().await;

        let latest = self
            .records
            .find_many(&RecordQuery {
                backup_type: Some(BackupType::Full),
                status: Some(BackupStatus::Completed),
                ..RecordQuery::newest(1)
            })
            .await
            .map_err(BackupError::Store)?;

        let interval = TimeDelta::from_std(self.config.schedule_interval)
            .map_err(|e| BackupError::Validation(format!("schedule interval out of range: {e}")))?;
        if let Some(last) = latest.first() {
            if Utc::now() - last.created_at < interval {
                debug!(last_backup = %last.id, "full backup is fresh, nothing scheduled");
                return Ok(None);
            }
        }

        info!("full backup is stale or missing, starting scheduled backup");
        let options = CreateOptions {
            include_media: true,
            include_logs: false,
            description: Some(SCHEDULED_DESCRIPTION.to_owned()),
            ..CreateOptions::new(BackupType::Full)
        };
        self.create_locked(options).await.map(Some)
    }
}
