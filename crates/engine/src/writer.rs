use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context};
use coop_backup_core::{snapshot_checksum, SnapshotPayload};

use crate::error::BackupError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSnapshot {
    pub size_bytes: u64,
    pub checksum: String,
}

/// Serializes `payload` to `path`.
///
/// Bytes go to a temporary file in the same directory which is renamed over
/// `path` once fully flushed, so readers never see a truncated snapshot.
pub fn write_snapshot(payload: &SnapshotPayload, path: &Path) -> Result<WrittenSnapshot, BackupError> {
    let parent = path
        .parent()
        .ok_or_else(|| BackupError::write(path, anyhow!("snapshot path has no parent directory")))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create backup dir: {}", parent.display()))
        .map_err(|e| BackupError::write(path, e))?;

    let bytes = serde_json::to_vec(payload)
        .context("serialize snapshot")
        .map_err(|e| BackupError::write(path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".snapshot-")
        .suffix(".partial")
        .tempfile_in(parent)
        .context("create temporary snapshot file")
        .map_err(|e| BackupError::write(path, e))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .context("write snapshot bytes")
        .map_err(|e| BackupError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| BackupError::write(path, anyhow::Error::new(e.error).context("move snapshot into place")))?;

    Ok(WrittenSnapshot {
        size_bytes: bytes.len() as u64,
        checksum: snapshot_checksum(&bytes),
    })
}

/// Reads a snapshot back, returning it with the checksum of the bytes on disk.
pub fn read_snapshot(path: &Path) -> anyhow::Result<(SnapshotPayload, String)> {
    let bytes = std::fs::read(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let payload = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    Ok((payload, snapshot_checksum(&bytes)))
}
