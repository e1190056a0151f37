use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use coop_backup_core::{Entity, EntityKind, FieldValue};
use rusqlite::{params_from_iter, types::Value, Connection};

use crate::entities::EntityRepository;

/// Portal tables in SQLite, one table per [`EntityKind`] with real foreign keys.
///
/// Rows keep their full tagged encoding in a `data` column; `id` and the
/// foreign-key columns are projected out so SQLite can enforce references.
/// A single connection is shared so that `begin`/`commit` span calls.
#[derive(Clone)]
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create entity db dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open entity db: {}", db_path.display()))?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("entity db connection poisoned"))?;
            f(&mut guard)
        })
        .await?
    }
}

fn init_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("enable foreign keys")?;
    for kind in EntityKind::forward() {
        conn.execute_batch(&table_ddl(kind))
            .with_context(|| format!("create table {kind}"))?;
    }
    Ok(())
}

fn table_ddl(kind: EntityKind) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY".to_owned()];
    for (column, parent) in kind.foreign_keys() {
        columns.push(format!("{column} INTEGER REFERENCES {parent}(id)"));
    }
    columns.push("data TEXT NOT NULL".to_owned());
    format!("CREATE TABLE IF NOT EXISTS {kind} ({});", columns.join(", "))
}

fn key_value(kind: EntityKind, entity: &Entity, column: &str) -> Result<Value> {
    match entity.get(column) {
        Some(FieldValue::Int(v)) => Ok(Value::Integer(*v)),
        Some(FieldValue::Null) | None => Ok(Value::Null),
        Some(other) => bail!("{kind}.{column} must be an integer, got {other:?}"),
    }
}

#[async_trait::async_trait]
impl EntityRepository for SqliteEntityStore {
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT data FROM {kind} ORDER BY id"))?;
            let raw = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raw.iter()
                .map(|data| {
                    serde_json::from_str::<Entity>(data)
                        .with_context(|| format!("decode {kind} row"))
                })
                .collect()
        })
        .await
    }

    async fn create_many(&self, kind: EntityKind, rows: &[Entity]) -> Result<()> {
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let foreign_keys = kind.foreign_keys();
            let mut columns = vec!["id"];
            columns.extend(foreign_keys.iter().map(|(column, _)| *column));
            columns.push("data");
            let placeholders = (1..=columns.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {kind} ({}) VALUES ({placeholders})",
                columns.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            for entity in &rows {
                if entity.id().is_none() {
                    bail!("{kind} row has no integer id");
                }
                let mut values = vec![key_value(kind, entity, "id")?];
                for (column, _) in foreign_keys {
                    values.push(key_value(kind, entity, column)?);
                }
                values.push(Value::Text(serde_json::to_string(entity)?));
                stmt.execute(params_from_iter(values))
                    .with_context(|| format!("insert into {kind}"))?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_all(&self, kind: EntityKind) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(&format!("DELETE FROM {kind}"), [])
                .with_context(|| format!("delete from {kind}"))?;
            Ok(())
        })
        .await
    }

    async fn describe_schema(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sql FROM sqlite_master
                 WHERE type IN ('table', 'index') AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
                 ORDER BY rowid",
            )?;
            let statements = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Some(
                statements
                    .into_iter()
                    .map(|sql| format!("{sql};"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        })
        .await
    }

    async fn begin(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE;").context("begin transaction")?;
            Ok(true)
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("COMMIT;").context("commit transaction"))
            .await
    }

    async fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("ROLLBACK;").context("rollback transaction"))
            .await
    }
}
