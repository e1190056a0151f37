use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::BackupType;
use crate::entity::{Entity, EntityKind};

/// Version of the envelope layout itself, independent of the portal schema.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub timestamp: DateTime<Utc>,
    /// Tag of the portal schema the entities were read from.
    pub schema_version: String,
    pub environment: String,
    pub backup_type: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A file under one media directory, relative to that directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFile {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogFileInfo {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Everything written to disk for one backup attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPayload {
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub entities: BTreeMap<EntityKind, Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<BTreeMap<String, Vec<MediaFile>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<BTreeMap<String, LogFileInfo>>,
}

impl SnapshotPayload {
    pub fn entity_counts(&self) -> BTreeMap<EntityKind, usize> {
        self.entities
            .iter()
            .map(|(kind, rows)| (*kind, rows.len()))
            .collect()
    }
}

/// `backup-<type>-<timestamp>-<nonce>.json`, safe to use as a path component.
pub fn snapshot_filename(backup_type: BackupType, at: DateTime<Utc>, nonce: &str) -> String {
    format!(
        "backup-{}-{}-{nonce}.json",
        backup_type.as_str().replace('_', "-"),
        format_timestamp(at)
    )
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn filename_is_path_safe_and_encodes_type() {
        let at = DateTime::parse_from_rfc3339("2026-02-13T01:00:00.250Z")
            .expect("rfc3339")
            .with_timezone(&Utc);
        let name = snapshot_filename(BackupType::DataOnly, at, "1a2b3c4d");
        assert_eq!(name, "backup-data-only-2026-02-13T01-00-00-250Z-1a2b3c4d.json");
        assert!(!Path::new(&name).has_root());
        assert!(!name.contains(':'));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let payload = SnapshotPayload {
            metadata: SnapshotMetadata {
                format_version: SNAPSHOT_FORMAT_VERSION,
                timestamp: Utc::now(),
                schema_version: "1".into(),
                environment: "test".into(),
                backup_type: BackupType::DataOnly,
                created_by: None,
                description: None,
            },
            entities: BTreeMap::from([(EntityKind::Companies, vec![Entity::new().with("id", 1)])]),
            schema: None,
            media: None,
            logs: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("schema").is_none());
        assert!(value.get("media").is_none());
        assert_eq!(value["metadata"]["backup_type"], "DATA_ONLY");
        assert_eq!(value["entities"]["companies"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload.entity_counts()[&EntityKind::Companies], 1);
    }
}
