use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use coop_backup_core::BackupType;
use coop_backup_daemon::config::{self, Config};
use coop_backup_daemon::{build_router, AppState};
use coop_backup_engine::{BackupEngine, CreateOptions, RestoreOptions};
use coop_backup_storage::{
    EntityRepository, PostgresRecordStore, RecordStore, SqliteEntityStore, SqliteRecordStore,
};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const SCHEDULE_POLL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    Create(CreateOptions),
    Restore(RestoreOptions),
    Delete(Uuid),
    List(usize),
    Cleanup,
    Schedule,
    Recover,
}

impl Command {
    /// Recovery fails every IN_PROGRESS record, including one a running
    /// daemon is still writing, so only the daemon itself and the explicit
    /// `recover` command may run it.
    fn recovers_interrupted(&self) -> bool {
        matches!(self, Command::Serve | Command::Recover)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, command) = parse_args(env::args().skip(1).collect())?;
    let engine = Arc::new(build_engine(&cfg).await?);

    if command.recovers_interrupted() {
        let recovered = engine.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "marked backups interrupted by a previous run as failed");
        }
    }

    match command {
        Command::Serve => run_service(engine, &cfg).await,
        Command::Recover => Ok(()),
        Command::Create(options) => {
            let id = engine.create_backup(options).await?;
            print_json(&engine.get_backup(id).await?)
        }
        Command::Restore(options) => print_json(&engine.restore_backup(options).await?),
        Command::Delete(id) => {
            engine.delete_backup(id).await?;
            info!(backup_id = %id, "deleted");
            Ok(())
        }
        Command::List(limit) => print_json(&engine.get_backups(limit).await?),
        Command::Cleanup => {
            let removed = engine.cleanup().await?;
            info!(removed, "cleanup finished");
            Ok(())
        }
        Command::Schedule => {
            match engine.schedule_backups().await? {
                Some(id) => info!(backup_id = %id, "scheduled backup created"),
                None => info!("latest full backup is recent, nothing to do"),
            }
            Ok(())
        }
    }
}

async fn build_engine(cfg: &Config) -> Result<BackupEngine> {
    let records: Arc<dyn RecordStore> = match cfg.database_url() {
        Some(url) => Arc::new(PostgresRecordStore::new(&url).await?),
        None => Arc::new(SqliteRecordStore::new(cfg.records_db())?),
    };
    let entities: Arc<dyn EntityRepository> = Arc::new(SqliteEntityStore::open(&cfg.entities_db())?);
    let engine_config = cfg.engine_config()?;
    info!(
        backup_dir = %engine_config.backup_dir.display(),
        max_backups = engine_config.max_backups,
        "backup engine configured"
    );
    Ok(BackupEngine::new(engine_config, records, entities)?)
}

/// Parse CLI args into the loaded config and the subcommand to run.
fn parse_args(args: Vec<String>) -> Result<(Config, Command)> {
    let mut config_path: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut backup_type = BackupType::Full;
    let mut include_media = false;
    let mut include_logs = false;
    let mut description: Option<String> = None;
    let mut created_by: Option<String> = None;
    let mut i = 0;

    let value_of = |flag: &str, i: usize| -> Result<String> {
        match args.get(i) {
            Some(value) => Ok(value.clone()),
            None => bail!("{flag} requires an argument"),
        }
    };

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(value_of("--config", i)?));
            }
            "--type" => {
                i += 1;
                backup_type = value_of("--type", i)?
                    .parse::<BackupType>()
                    .map_err(anyhow::Error::msg)?;
            }
            "--description" => {
                i += 1;
                description = Some(value_of("--description", i)?);
            }
            "--created-by" => {
                i += 1;
                created_by = Some(value_of("--created-by", i)?);
            }
            "--media" => include_media = true,
            "--logs" => include_logs = true,
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            other => positional.push(other.to_owned()),
        }
        i += 1;
    }

    let parse_id = |raw: Option<&String>, sub: &str| -> Result<Uuid> {
        let raw = raw.with_context(|| format!("{sub} requires a backup id"))?;
        Uuid::parse_str(raw).with_context(|| format!("invalid backup id: {raw}"))
    };

    let command = match positional.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("create") => Command::Create(CreateOptions {
            backup_type,
            include_media,
            include_logs,
            created_by,
            description,
        }),
        Some("restore") => Command::Restore(RestoreOptions {
            backup_id: parse_id(positional.get(1), "restore")?,
            include_media,
            include_logs,
        }),
        Some("delete") => Command::Delete(parse_id(positional.get(1), "delete")?),
        Some("list") => Command::List(match positional.get(1) {
            Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid limit: {raw}"))?,
            None => DEFAULT_LIST_LIMIT,
        }),
        Some("cleanup") => Command::Cleanup,
        Some("schedule") => Command::Schedule,
        Some("recover") => Command::Recover,
        Some(other) => bail!("unknown command: {other}"),
    };

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, command))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_service(engine: Arc<BackupEngine>, cfg: &Config) -> Result<()> {
    let state = AppState {
        engine: engine.clone(),
        restore_gate: Arc::new(Mutex::new(None)),
        csrf_token: cfg.csrf_token(),
        api_token: cfg.api_token(),
    };

    tokio::spawn(scheduler_loop(engine));

    let listen = cfg.listen();
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let app = build_router(state);

    info!(%addr, "starting backup API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Hourly check; the engine decides whether the last FULL backup is stale.
async fn scheduler_loop(engine: Arc<BackupEngine>) {
    loop {
        match engine.schedule_backups().await {
            Ok(Some(id)) => info!(backup_id = %id, "scheduled backup created"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "scheduled backup failed"),
        }
        sleep(SCHEDULE_POLL).await;
    }
}
