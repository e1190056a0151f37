use coop_backup_core::RecordQuery;
use tracing::{info, warn};

use crate::engine::BackupEngine;
use crate::error::BackupError;

impl BackupEngine {
    /// Deletes every backup beyond the newest `max_backups`, returning how many
    /// were removed.
    pub async fn cleanup(&self) -> Result<usize, BackupError> {
        let _guard = self.op_lock.lock().await;
        self.cleanup_locked().await
    }

    /// Best effort: a record that cannot be deleted is logged and skipped so it
    /// does not block pruning of the rest.
    pub(crate) async fn cleanup_locked(&self) -> Result<usize, BackupError> {
        let doomed = self
            .records
            .find_many(&RecordQuery {
                skip: self.config.max_backups,
                ..RecordQuery::default()
            })
            .await
            .map_err(BackupError::Store)?;

        let mut removed = 0;
        for record in doomed {
            match self.delete_locked(record.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(backup_id = %record.id, error = %e, "retention could not delete backup"),
            }
        }
        if removed > 0 {
            info!(removed, "retention cleanup finished");
        }
        Ok(removed)
    }
}
