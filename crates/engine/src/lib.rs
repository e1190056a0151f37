//! Snapshot, restore and retention engine for the internship portal's data.

mod collector;
pub mod config;
mod engine;
pub mod error;
mod restore;
mod retention;
mod schedule;
pub mod walk;
mod writer;

pub use collector::{structural_schema, Collector};
pub use config::EngineConfig;
pub use engine::{BackupEngine, CreateOptions, RestoreOptions};
pub use error::BackupError;
pub use restore::RestoreSummary;
pub use schedule::SCHEDULED_DESCRIPTION;
pub use writer::{read_snapshot, write_snapshot, WrittenSnapshot};
