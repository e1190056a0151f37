#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use coop_backup_core::{Entity, EntityKind};
use coop_backup_engine::{BackupEngine, EngineConfig};
use coop_backup_storage::{EntityRepository, SqliteRecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    FindAll(EntityKind),
    CreateMany(EntityKind, usize),
    DeleteAll(EntityKind),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::FindAll(_))
    }
}

/// In-memory repository that records every call in order.
#[derive(Default)]
pub struct RecordingRepo {
    tables: Mutex<BTreeMap<EntityKind, Vec<Entity>>>,
    calls: Mutex<Vec<Call>>,
    fail_reads_of: Option<EntityKind>,
    fail_inserts_of: Option<EntityKind>,
}

impl RecordingRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reads_of(kind: EntityKind) -> Self {
        Self {
            fail_reads_of: Some(kind),
            ..Self::default()
        }
    }

    pub fn failing_inserts_of(kind: EntityKind) -> Self {
        Self {
            fail_inserts_of: Some(kind),
            ..Self::default()
        }
    }

    pub fn seed(&self, kind: EntityKind, count: i64) {
        let rows = (1..=count)
            .map(|id| Entity::new().with("id", id).with("name", format!("{kind} #{id}")))
            .collect();
        self.tables.lock().unwrap().insert(kind, rows);
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.lock().unwrap().get(&kind).map_or(0, Vec::len)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl EntityRepository for RecordingRepo {
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.calls.lock().unwrap().push(Call::FindAll(kind));
        if self.fail_reads_of == Some(kind) {
            bail!("connection reset while reading {kind}");
        }
        Ok(self.tables.lock().unwrap().get(&kind).cloned().unwrap_or_default())
    }

    async fn create_many(&self, kind: EntityKind, rows: &[Entity]) -> Result<()> {
        self.calls.lock().unwrap().push(Call::CreateMany(kind, rows.len()));
        if self.fail_inserts_of == Some(kind) {
            bail!("constraint violation inserting {kind}");
        }
        self.tables
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn delete_all(&self, kind: EntityKind) -> Result<()> {
        self.calls.lock().unwrap().push(Call::DeleteAll(kind));
        self.tables.lock().unwrap().remove(&kind);
        Ok(())
    }
}

pub fn build_engine_with(
    root: &Path,
    repo: Arc<dyn EntityRepository>,
    configure: impl FnOnce(&mut EngineConfig),
) -> BackupEngine {
    let records = SqliteRecordStore::new(root.join("state").join("backups.db")).unwrap();
    let mut config = EngineConfig::new(root.join("backups"));
    config.environment = "test".into();
    configure(&mut config);
    BackupEngine::new(config, Arc::new(records), repo).unwrap()
}

pub fn build_engine(root: &Path, repo: Arc<dyn EntityRepository>) -> BackupEngine {
    build_engine_with(root, repo, |_| {})
}

pub fn snapshot_files(root: &Path) -> Vec<String> {
    let dir = root.join("backups");
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
