use std::path::PathBuf;
use std::time::Duration;

/// How long a FULL backup stays fresh before the schedule trigger takes another.
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Only log files modified within this window are listed in a snapshot.
pub const DEFAULT_LOG_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const DEFAULT_MAX_BACKUPS: usize = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backup_dir: PathBuf,
    pub max_backups: usize,
    pub media_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub environment: String,
    pub schema_version: String,
    pub log_window: Duration,
    pub schedule_interval: Duration,
}

impl EngineConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            max_backups: DEFAULT_MAX_BACKUPS,
            media_root: None,
            log_dir: None,
            environment: "production".to_owned(),
            schema_version: env!("CARGO_PKG_VERSION").to_owned(),
            log_window: DEFAULT_LOG_WINDOW,
            schedule_interval: DEFAULT_SCHEDULE_INTERVAL,
        }
    }
}
