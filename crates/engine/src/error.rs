use std::path::PathBuf;

use coop_backup_core::BackupStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid backup options: {0}")]
    Validation(String),

    #[error("failed to collect {stage}: {source:#}")]
    Collection {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("snapshot file {}: {source:#}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("backup {0} not found")]
    NotFound(Uuid),

    #[error("backup {id} is {status}, expected completed")]
    InvalidState { id: Uuid, status: BackupStatus },

    #[error("snapshot file for backup {id} is missing: {}", .path.display())]
    MissingFile { id: Uuid, path: PathBuf },

    #[error("restore failed while {stage}: {source:#}")]
    Restore {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("backup record store: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl BackupError {
    pub(crate) fn collection(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        BackupError::Collection {
            stage: stage.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        BackupError::Write {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn restore(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        BackupError::Restore {
            stage: stage.into(),
            source: source.into(),
        }
    }
}
