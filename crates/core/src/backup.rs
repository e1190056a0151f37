use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a snapshot contains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Full,
    DataOnly,
    SchemaOnly,
}

impl BackupType {
    pub fn includes_data(self) -> bool {
        matches!(self, BackupType::Full | BackupType::DataOnly)
    }

    pub fn includes_schema(self) -> bool {
        matches!(self, BackupType::Full | BackupType::SchemaOnly)
    }

    /// Stable string used in the record store and in snapshot filenames.
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::DataOnly => "data_only",
            BackupType::SchemaOnly => "schema_only",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().replace('-', "_").as_str() {
            "full" => Ok(BackupType::Full),
            "data_only" => Ok(BackupType::DataOnly),
            "schema_only" => Ok(BackupType::SchemaOnly),
            other => Err(format!("unknown backup type: {other}")),
        }
    }
}

/// Lifecycle of one snapshot attempt. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "in_progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("unknown backup status: {other}")),
        }
    }
}

/// Free-form run options recorded alongside a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub include_media: bool,
    pub include_logs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SHA-256 of the snapshot file, filled in on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub id: Uuid,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_size_bytes: Option<u64>,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub metadata: RecordMetadata,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub filename: String,
    pub file_path: PathBuf,
    pub backup_type: BackupType,
    pub metadata: RecordMetadata,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewBackupRecord {
    /// Builds the in-progress record that exists for the duration of a run.
    pub fn in_progress(self, id: Uuid) -> BackupRecord {
        BackupRecord {
            id,
            filename: self.filename,
            file_path: self.file_path,
            file_size_bytes: None,
            backup_type: self.backup_type,
            status: BackupStatus::InProgress,
            metadata: self.metadata,
            created_by: self.created_by,
            created_at: self.created_at,
            completed_at: None,
            error_message: None,
        }
    }
}

/// The single transition a record may take out of `InProgress`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordTransition {
    Completed {
        file_size_bytes: u64,
        checksum: String,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error_message: String,
    },
}

impl RecordTransition {
    pub fn target_status(&self) -> BackupStatus {
        match self {
            RecordTransition::Completed { .. } => BackupStatus::Completed,
            RecordTransition::Failed { .. } => BackupStatus::Failed,
        }
    }

    /// Applies the transition to an in-memory copy of the record.
    pub fn apply(&self, record: &mut BackupRecord) {
        match self {
            RecordTransition::Completed {
                file_size_bytes,
                checksum,
                completed_at,
            } => {
                record.status = BackupStatus::Completed;
                record.file_size_bytes = Some(*file_size_bytes);
                record.completed_at = Some(*completed_at);
                record.metadata.checksum = Some(checksum.clone());
            }
            RecordTransition::Failed { error_message } => {
                record.status = BackupStatus::Failed;
                record.error_message = Some(error_message.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter and paging for listing records.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub order: RecordOrder,
    pub skip: usize,
    pub take: Option<usize>,
    pub backup_type: Option<BackupType>,
    pub status: Option<BackupStatus>,
}

impl RecordQuery {
    pub fn newest(take: usize) -> Self {
        Self {
            take: Some(take),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_type_parses_cli_spellings() {
        assert_eq!("FULL".parse::<BackupType>().unwrap(), BackupType::Full);
        assert_eq!("data-only".parse::<BackupType>().unwrap(), BackupType::DataOnly);
        assert_eq!("schema_only".parse::<BackupType>().unwrap(), BackupType::SchemaOnly);
        assert!("incremental".parse::<BackupType>().is_err());
    }

    #[test]
    fn backup_type_content_flags() {
        assert!(BackupType::Full.includes_data() && BackupType::Full.includes_schema());
        assert!(BackupType::DataOnly.includes_data() && !BackupType::DataOnly.includes_schema());
        assert!(!BackupType::SchemaOnly.includes_data() && BackupType::SchemaOnly.includes_schema());
    }

    #[test]
    fn status_round_trips_through_store_spelling() {
        for status in [BackupStatus::InProgress, BackupStatus::Completed, BackupStatus::Failed] {
            assert_eq!(status.as_str().parse::<BackupStatus>().unwrap(), status);
        }
        assert!(!BackupStatus::InProgress.is_terminal());
        assert!(BackupStatus::Failed.is_terminal());
    }

    #[test]
    fn completed_transition_sets_size_and_checksum() {
        let new = NewBackupRecord {
            filename: "backup-full-x.json".into(),
            file_path: PathBuf::from("/tmp/backup-full-x.json"),
            backup_type: BackupType::Full,
            metadata: RecordMetadata::default(),
            created_by: None,
            created_at: Utc::now(),
        };
        let mut record = new.in_progress(Uuid::new_v4());
        let done = Utc::now();
        RecordTransition::Completed {
            file_size_bytes: 42,
            checksum: "abc".into(),
            completed_at: done,
        }
        .apply(&mut record);

        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.file_size_bytes, Some(42));
        assert_eq!(record.completed_at, Some(done));
        assert_eq!(record.metadata.checksum.as_deref(), Some("abc"));
        assert!(record.error_message.is_none());
    }
}
