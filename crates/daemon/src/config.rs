use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coop_backup_engine::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
    pub entities_db: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: Option<String>,
    pub max_backups: Option<usize>,
    pub media_root: Option<String>,
    pub log_dir: Option<String>,
    pub environment: Option<String>,
    pub schema_version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
    pub csrf_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Environment variable first, then the config file value.
fn pick(var: &str, file_value: &Option<String>) -> Option<String> {
    env::var(var).ok().or_else(|| file_value.clone())
}

impl Config {
    pub fn listen(&self) -> String {
        pick("COOP_BACKUP_LISTEN", &self.server.listen).unwrap_or_else(|| "127.0.0.1:8089".to_owned())
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(pick("COOP_BACKUP_ROOT", &self.storage.root).unwrap_or_else(|| "./data".to_owned()))
    }

    pub fn database_url(&self) -> Option<String> {
        pick("DATABASE_URL", &self.storage.database_url)
    }

    pub fn entities_db(&self) -> PathBuf {
        pick("COOP_BACKUP_ENTITIES_DB", &self.storage.entities_db)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root().join("state").join("portal.db"))
    }

    pub fn records_db(&self) -> PathBuf {
        self.root().join("state").join("backups.db")
    }

    pub fn api_token(&self) -> Option<String> {
        pick("COOP_BACKUP_API_TOKEN", &self.security.api_token)
    }

    pub fn csrf_token(&self) -> Option<String> {
        pick("COOP_BACKUP_CSRF_TOKEN", &self.security.csrf_token)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let dir = pick("COOP_BACKUP_DIR", &self.backup.dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root().join("backups"));
        let mut engine = EngineConfig::new(dir);

        if let Ok(raw) = env::var("COOP_BACKUP_MAX_BACKUPS") {
            engine.max_backups = raw
                .parse()
                .with_context(|| format!("COOP_BACKUP_MAX_BACKUPS is not a number: {raw}"))?;
        } else if let Some(max) = self.backup.max_backups {
            engine.max_backups = max;
        }
        engine.media_root = pick("COOP_BACKUP_MEDIA_ROOT", &self.backup.media_root).map(PathBuf::from);
        engine.log_dir = pick("COOP_BACKUP_LOG_DIR", &self.backup.log_dir).map(PathBuf::from);
        if let Some(environment) = pick("COOP_BACKUP_ENV", &self.backup.environment) {
            engine.environment = environment;
        }
        if let Some(schema_version) = &self.backup.schema_version {
            engine.schema_version = schema_version.clone();
        }
        Ok(engine)
    }
}
