pub mod backup;
pub mod entity;
pub mod hash;
pub mod snapshot;

pub use backup::{
    BackupRecord, BackupStatus, BackupType, NewBackupRecord, RecordMetadata, RecordOrder,
    RecordQuery, RecordTransition,
};
pub use entity::{Entity, EntityKind, FieldValue};
pub use hash::snapshot_checksum;
pub use snapshot::{
    snapshot_filename, LogFileInfo, MediaFile, SnapshotMetadata, SnapshotPayload,
    SNAPSHOT_FORMAT_VERSION,
};
