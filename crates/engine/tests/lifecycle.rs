mod common;

use std::sync::Arc;
use std::time::Duration;

use coop_backup_core::{BackupStatus, BackupType, EntityKind, NewBackupRecord, RecordMetadata};
use coop_backup_engine::{read_snapshot, BackupError, CreateOptions, SCHEDULED_DESCRIPTION};
use coop_backup_storage::{RecordStore, SqliteRecordStore};

use common::{build_engine, build_engine_with, snapshot_files, RecordingRepo};

#[tokio::test]
async fn data_only_backup_captures_every_row() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(RecordingRepo::new());
    repo.seed(EntityKind::Companies, 3);
    repo.seed(EntityKind::Applications, 5);
    let engine = build_engine(tmp.path(), repo.clone());

    let id = engine
        .create_backup(CreateOptions::new(BackupType::DataOnly))
        .await
        .unwrap();

    let record = engine.get_backup(id).await.unwrap().unwrap();
    assert_eq!(record.status, BackupStatus::Completed);
    assert!(record.file_size_bytes.unwrap() > 0);
    assert!(record.completed_at.is_some());
    assert!(record.error_message.is_none());
    assert!(record.filename.starts_with("backup-data-only-"));

    let (payload, checksum) = read_snapshot(&record.file_path).unwrap();
    assert_eq!(payload.entities[&EntityKind::Companies].len(), 3);
    assert_eq!(payload.entities[&EntityKind::Applications].len(), 5);
    assert!(payload.schema.is_none());
    assert!(payload.media.is_none() && payload.logs.is_none());
    assert_eq!(payload.metadata.environment, "test");
    assert_eq!(record.metadata.checksum.as_deref(), Some(checksum.as_str()));
}

#[tokio::test]
async fn collection_reads_kinds_in_dependency_order() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(RecordingRepo::new());
    let engine = build_engine(tmp.path(), repo.clone());

    engine.create_backup(CreateOptions::new(BackupType::Full)).await.unwrap();

    let reads: Vec<_> = repo
        .calls()
        .into_iter()
        .map(|call| match call {
            common::Call::FindAll(kind) => kind,
            other => panic!("backup must not mutate the store: {other:?}"),
        })
        .collect();
    assert_eq!(reads, EntityKind::ORDER.to_vec());
}

#[tokio::test]
async fn every_backup_type_ends_in_a_terminal_state() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));

    for backup_type in [BackupType::Full, BackupType::DataOnly, BackupType::SchemaOnly] {
        let id = engine.create_backup(CreateOptions::new(backup_type)).await.unwrap();
        let record = engine.get_backup(id).await.unwrap().unwrap();
        assert_eq!(record.status, BackupStatus::Completed, "{backup_type}");
    }

    let failing = tempfile::tempdir().unwrap();
    let engine = build_engine(
        failing.path(),
        Arc::new(RecordingRepo::failing_reads_of(EntityKind::Internships)),
    );
    let err = engine
        .create_backup(CreateOptions::new(BackupType::Full))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Collection { .. }), "{err}");

    let records = engine.get_backups(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| r.status.is_terminal()));
}

#[tokio::test]
async fn collection_failure_marks_record_failed_and_leaves_no_file() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(
        tmp.path(),
        Arc::new(RecordingRepo::failing_reads_of(EntityKind::Students)),
    );

    let err = engine
        .create_backup(CreateOptions::new(BackupType::DataOnly))
        .await
        .unwrap_err();

    let record = engine.get_backups(1).await.unwrap().remove(0);
    assert_eq!(record.status, BackupStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(err.to_string().as_str()));
    assert!(record.error_message.unwrap().contains("students"));
    assert!(record.file_size_bytes.is_none() && record.completed_at.is_none());
    assert!(snapshot_files(tmp.path()).is_empty());
}

#[tokio::test]
async fn unwritable_backup_dir_marks_record_failed() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("backups"), b"not a directory").unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));

    let err = engine
        .create_backup(CreateOptions::new(BackupType::Full))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Write { .. }), "{err}");

    let record = engine.get_backups(1).await.unwrap().remove(0);
    assert_eq!(record.status, BackupStatus::Failed);
}

#[tokio::test]
async fn invalid_options_are_rejected_before_any_record_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));

    let blank_actor = CreateOptions {
        created_by: Some("  ".into()),
        ..CreateOptions::new(BackupType::Full)
    };
    let long_description = CreateOptions {
        description: Some("x".repeat(501)),
        ..CreateOptions::new(BackupType::Full)
    };

    for options in [blank_actor, long_description] {
        let err = engine.create_backup(options).await.unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)), "{err}");
    }
    assert!(engine.get_backups(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn options_and_actor_are_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));

    let id = engine
        .create_backup(CreateOptions {
            created_by: Some("staff-17".into()),
            description: Some("before term rollover".into()),
            ..CreateOptions::new(BackupType::SchemaOnly)
        })
        .await
        .unwrap();

    let record = engine.get_backup(id).await.unwrap().unwrap();
    assert_eq!(record.created_by.as_deref(), Some("staff-17"));
    assert_eq!(record.metadata.description.as_deref(), Some("before term rollover"));

    let (payload, _) = read_snapshot(&record.file_path).unwrap();
    assert!(payload.entities.is_empty());
    let schema = payload.schema.unwrap();
    assert!(schema.contains("internships(id, company_id -> companies)"), "{schema}");
    assert_eq!(payload.metadata.created_by.as_deref(), Some("staff-17"));
}

#[tokio::test]
async fn delete_removes_file_and_record_and_second_call_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));
    let id = engine.create_backup(CreateOptions::new(BackupType::Full)).await.unwrap();
    assert_eq!(snapshot_files(tmp.path()).len(), 1);

    engine.delete_backup(id).await.unwrap();
    assert!(snapshot_files(tmp.path()).is_empty());
    assert!(engine.get_backup(id).await.unwrap().is_none());

    let err = engine.delete_backup(id).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn delete_tolerates_an_already_missing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));
    let id = engine.create_backup(CreateOptions::new(BackupType::Full)).await.unwrap();
    let record = engine.get_backup(id).await.unwrap().unwrap();
    std::fs::remove_file(&record.file_path).unwrap();

    engine.delete_backup(id).await.unwrap();
    assert!(engine.get_backup(id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_reports_a_snapshot_that_cannot_be_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));
    let id = engine.create_backup(CreateOptions::new(BackupType::Full)).await.unwrap();
    let record = engine.get_backup(id).await.unwrap().unwrap();

    // A non-empty directory where the snapshot file used to be.
    std::fs::remove_file(&record.file_path).unwrap();
    std::fs::create_dir_all(record.file_path.join("pinned")).unwrap();

    let err = engine.delete_backup(id).await.unwrap_err();
    assert!(matches!(err, BackupError::Write { .. }), "{err}");
    let message = err.to_string();
    assert!(message.contains("remove snapshot"), "{message}");
    assert!(!message.contains("write"), "{message}");
    assert!(engine.get_backup(id).await.unwrap().is_some());
}

#[tokio::test]
async fn retention_keeps_only_the_newest_backups() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));
    assert_eq!(engine.config().max_backups, 30);

    let mut ids = Vec::new();
    for _ in 0..35 {
        ids.push(engine.create_backup(CreateOptions::new(BackupType::DataOnly)).await.unwrap());
    }

    let remaining: Vec<_> = engine.get_backups(100).await.unwrap().into_iter().map(|r| r.id).collect();
    let expected: Vec<_> = ids[5..].iter().rev().copied().collect();
    assert_eq!(remaining, expected);
    assert_eq!(snapshot_files(tmp.path()).len(), 30);
}

#[tokio::test]
async fn on_demand_cleanup_applies_a_lowered_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(RecordingRepo::new());
    {
        let engine = build_engine(tmp.path(), repo.clone());
        for _ in 0..4 {
            engine.create_backup(CreateOptions::new(BackupType::DataOnly)).await.unwrap();
        }
    }

    let engine = build_engine_with(tmp.path(), repo, |config| config.max_backups = 2);
    assert_eq!(engine.cleanup().await.unwrap(), 2);
    assert_eq!(engine.get_backups(10).await.unwrap().len(), 2);
    assert_eq!(engine.cleanup().await.unwrap(), 0);
}

#[tokio::test]
async fn schedule_only_runs_when_the_last_full_backup_is_stale() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));

    let first = engine.schedule_backups().await.unwrap().expect("no backups yet");
    let record = engine.get_backup(first).await.unwrap().unwrap();
    assert_eq!(record.backup_type, BackupType::Full);
    assert!(record.metadata.include_media && !record.metadata.include_logs);
    assert_eq!(record.metadata.description.as_deref(), Some(SCHEDULED_DESCRIPTION));

    assert!(engine.schedule_backups().await.unwrap().is_none());
}

#[tokio::test]
async fn schedule_ignores_partial_and_failed_backups() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Arc::new(RecordingRepo::new());
    let engine = build_engine(tmp.path(), repo.clone());
    assert_eq!(engine.config().schedule_interval, Duration::from_secs(24 * 60 * 60));

    engine.create_backup(CreateOptions::new(BackupType::DataOnly)).await.unwrap();
    engine.create_backup(CreateOptions::new(BackupType::SchemaOnly)).await.unwrap();

    // A FULL backup that fails shares the record store but not the repository.
    let failing = build_engine(
        tmp.path(),
        Arc::new(RecordingRepo::failing_reads_of(EntityKind::Companies)),
    );
    failing
        .create_backup(CreateOptions::new(BackupType::Full))
        .await
        .unwrap_err();
    let records = engine.get_backups(10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .any(|r| r.backup_type == BackupType::Full && r.status == BackupStatus::Failed));

    let scheduled = engine.schedule_backups().await.unwrap().expect("no completed full backup yet");
    let record = engine.get_backup(scheduled).await.unwrap().unwrap();
    assert_eq!(record.backup_type, BackupType::Full);
    assert_eq!(record.status, BackupStatus::Completed);

    assert!(engine.schedule_backups().await.unwrap().is_none());
}

#[tokio::test]
async fn schedule_takes_another_backup_once_the_interval_passes() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = build_engine_with(tmp.path(), Arc::new(RecordingRepo::new()), |config| {
        config.schedule_interval = Duration::ZERO;
    });
    let first = engine.schedule_backups().await.unwrap().unwrap();
    let second = engine.schedule_backups().await.unwrap().unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn interrupted_backups_are_marked_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::new(tmp.path().join("state").join("backups.db")).unwrap();
    let stuck = store
        .create(NewBackupRecord {
            filename: "backup-full-crashed.json".into(),
            file_path: tmp.path().join("backups").join("backup-full-crashed.json"),
            backup_type: BackupType::Full,
            metadata: RecordMetadata::default(),
            created_by: None,
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let engine = build_engine(tmp.path(), Arc::new(RecordingRepo::new()));
    assert_eq!(engine.recover_interrupted().await.unwrap(), 1);

    let record = engine.get_backup(stuck.id).await.unwrap().unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("interrupted before completion"));
    assert_eq!(engine.recover_interrupted().await.unwrap(), 0);
}
