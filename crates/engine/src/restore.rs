use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use coop_backup_core::{EntityKind, SnapshotPayload};
use coop_backup_storage::EntityRepository;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::BackupError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestoreSummary {
    pub backup_id: Uuid,
    /// Rows inserted per kind.
    pub restored: BTreeMap<EntityKind, usize>,
    /// Whether clear and re-insert ran inside one store transaction.
    pub atomic: bool,
    /// Media files listed in the snapshot that are not present on disk.
    pub missing_media: Vec<PathBuf>,
    /// Media or log directories that could not be recreated after the
    /// entities were committed.
    pub layout_errors: Vec<String>,
}

/// Replaces the contents of `repo` with the entities in `payload`.
///
/// Every kind is cleared children-first, then re-inserted parents-first. When
/// the repository supports transactions the whole replacement is atomic;
/// otherwise a failure leaves the store partially cleared.
pub async fn restore_entities(
    repo: &dyn EntityRepository,
    payload: &SnapshotPayload,
) -> Result<(BTreeMap<EntityKind, usize>, bool), BackupError> {
    let atomic = repo
        .begin()
        .await
        .map_err(|e| BackupError::restore("opening transaction", e))?;

    match replace_all(repo, payload).await {
        Ok(restored) => {
            if atomic {
                repo.commit()
                    .await
                    .map_err(|e| BackupError::restore("committing", e))?;
            }
            Ok((restored, atomic))
        }
        Err(err) => {
            if atomic {
                if let Err(rollback_err) = repo.rollback().await {
                    error!(error = %rollback_err, "rollback after failed restore also failed");
                }
            } else {
                warn!("store has no transactions; it may now be partially restored");
            }
            Err(err)
        }
    }
}

async fn replace_all(
    repo: &dyn EntityRepository,
    payload: &SnapshotPayload,
) -> Result<BTreeMap<EntityKind, usize>, BackupError> {
    for kind in EntityKind::reverse() {
        repo.delete_all(kind)
            .await
            .map_err(|e| BackupError::restore(format!("clearing {kind}"), e))?;
        debug!(%kind, "cleared");
    }

    let mut restored = BTreeMap::new();
    for kind in EntityKind::forward() {
        let rows = payload.entities.get(&kind).map(Vec::as_slice).unwrap_or_default();
        if !rows.is_empty() {
            repo.create_many(kind, rows)
                .await
                .map_err(|e| BackupError::restore(format!("inserting {kind}"), e))?;
        }
        debug!(%kind, rows = rows.len(), "inserted");
        restored.insert(kind, rows.len());
    }
    Ok(restored)
}

/// Recreates the media directory layout. File contents are not part of a
/// snapshot, so files that are absent are reported rather than created.
pub fn restore_media_layout(
    payload: &SnapshotPayload,
    media_root: &Path,
) -> Result<Vec<PathBuf>, BackupError> {
    let Some(media) = &payload.media else {
        return Ok(Vec::new());
    };

    check_media_paths(payload)?;

    let mut missing = Vec::new();
    for (dir, files) in media {
        let dir_path = media_root.join(dir);
        std::fs::create_dir_all(&dir_path)
            .with_context(|| format!("create {}", dir_path.display()))
            .map_err(|e| BackupError::restore("recreating media layout", e))?;
        for file in files {
            let target = media_root.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))
                    .map_err(|e| BackupError::restore("recreating media layout", e))?;
            }
            if !target.exists() {
                missing.push(file.path.clone());
            }
        }
    }
    Ok(missing)
}

/// Rejects media entries that would resolve outside the media root.
pub fn check_media_paths(payload: &SnapshotPayload) -> Result<(), BackupError> {
    let Some(media) = &payload.media else {
        return Ok(());
    };
    for (dir, files) in media {
        let paths = std::iter::once(Path::new(dir)).chain(files.iter().map(|f| f.path.as_path()));
        for relative in paths {
            if !stays_inside(relative) {
                return Err(BackupError::restore(
                    "checking media layout",
                    anyhow!("media path escapes the media root: {}", relative.display()),
                ));
            }
        }
    }
    Ok(())
}

fn stays_inside(relative: &Path) -> bool {
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

pub fn restore_log_layout(payload: &SnapshotPayload, log_dir: &Path) -> Result<(), BackupError> {
    if payload.logs.is_none() {
        return Ok(());
    }
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create {}", log_dir.display()))
        .map_err(|e| BackupError::restore("recreating log directory", e))
}
