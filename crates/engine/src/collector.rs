use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use coop_backup_core::{EntityKind, LogFileInfo, MediaFile, SnapshotMetadata, SnapshotPayload};
use coop_backup_storage::EntityRepository;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::BackupError;
use crate::walk::{subdirectories, walk_files};

/// Reads the portal's state into a snapshot payload. Never writes.
pub struct Collector<'a> {
    entities: &'a dyn EntityRepository,
    config: &'a EngineConfig,
}

impl<'a> Collector<'a> {
    pub fn new(entities: &'a dyn EntityRepository, config: &'a EngineConfig) -> Self {
        Self { entities, config }
    }

    /// Gathers everything `metadata.backup_type` asks for. Any read failure
    /// aborts the whole collection; no partial payload is returned.
    pub async fn collect(
        &self,
        metadata: SnapshotMetadata,
        include_media: bool,
        include_logs: bool,
    ) -> Result<SnapshotPayload, BackupError> {
        let backup_type = metadata.backup_type;

        let mut entities = BTreeMap::new();
        if backup_type.includes_data() {
            for kind in EntityKind::forward() {
                let rows = self
                    .entities
                    .find_all(kind)
                    .await
                    .map_err(|e| BackupError::collection(kind.as_str(), e))?;
                debug!(%kind, rows = rows.len(), "collected entities");
                entities.insert(kind, rows);
            }
        }

        let schema = if backup_type.includes_schema() {
            Some(self.schema().await?)
        } else {
            None
        };

        let media = if include_media {
            Some(self.media().map_err(|e| BackupError::collection("media listing", e))?)
        } else {
            None
        };

        let logs = if include_logs {
            Some(self.logs().map_err(|e| BackupError::collection("log listing", e))?)
        } else {
            None
        };

        Ok(SnapshotPayload {
            metadata,
            entities,
            schema,
            media,
            logs,
        })
    }

    async fn schema(&self) -> Result<String, BackupError> {
        let ddl = self
            .entities
            .describe_schema()
            .await
            .map_err(|e| BackupError::collection("schema", e))?;
        Ok(ddl.unwrap_or_else(structural_schema))
    }

    fn media(&self) -> Result<BTreeMap<String, Vec<MediaFile>>> {
        let Some(root) = existing_dir(self.config.media_root.as_deref(), "media") else {
            return Ok(BTreeMap::new());
        };

        let mut listing = BTreeMap::new();
        for dir in subdirectories(root)? {
            let name = file_name(&dir);
            let files = walk_files(&dir, None)
                .map(|entry| {
                    entry.map(|entry| MediaFile {
                        filename: file_name(&entry.path),
                        path: Path::new(&name).join(&entry.relative),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            listing.insert(name, files);
        }
        Ok(listing)
    }

    fn logs(&self) -> Result<BTreeMap<String, LogFileInfo>> {
        let Some(dir) = existing_dir(self.config.log_dir.as_deref(), "log") else {
            return Ok(BTreeMap::new());
        };

        let cutoff = Utc::now() - TimeDelta::from_std(self.config.log_window)?;
        let mut listing = BTreeMap::new();
        for entry in walk_files(dir, Some(1)) {
            let entry = entry?;
            if entry.modified_at < cutoff {
                continue;
            }
            listing.insert(
                file_name(&entry.path),
                LogFileInfo {
                    size: entry.size,
                    modified_at: entry.modified_at,
                    path: entry.relative,
                },
            );
        }
        Ok(listing)
    }
}

/// Plain-text description of tables and their references, used when the
/// repository cannot produce DDL.
pub fn structural_schema() -> String {
    let mut lines = vec!["-- structural schema: table(columns), fk -> referenced table".to_owned()];
    for kind in EntityKind::forward() {
        let mut columns = vec!["id".to_owned()];
        columns.extend(
            kind.foreign_keys()
                .iter()
                .map(|(column, parent)| format!("{column} -> {parent}")),
        );
        lines.push(format!("{kind}({})", columns.join(", ")));
    }
    lines.join("\n")
}

fn existing_dir<'p>(dir: Option<&'p Path>, what: &str) -> Option<&'p Path> {
    match dir {
        None => {
            warn!("{what} listing requested but no {what} directory is configured");
            None
        }
        Some(dir) if !dir.is_dir() => {
            warn!(dir = %dir.display(), "{what} directory does not exist, listing is empty");
            None
        }
        Some(dir) => Some(dir),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_schema_lists_kinds_in_dependency_order() {
        let schema = structural_schema();
        let faculties = schema.find("\nfaculties(id)").unwrap();
        let departments = schema.find("\ndepartments(id, faculty_id -> faculties)").unwrap();
        let applications = schema
            .find("\napplications(id, student_id -> students, internship_id -> internships)")
            .unwrap();
        assert!(faculties < departments && departments < applications);
    }
}
