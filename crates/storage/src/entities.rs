use anyhow::Result;
use coop_backup_core::{Entity, EntityKind};

/// Read/write access to the portal's tables, keyed by entity kind.
///
/// The backup engine only ever walks kinds in [`EntityKind::ORDER`] (or its
/// reverse), so implementations may enforce foreign keys.
#[async_trait::async_trait]
pub trait EntityRepository: Send + Sync {
    /// Every row of `kind`, unfiltered.
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<Entity>>;

    async fn create_many(&self, kind: EntityKind, rows: &[Entity]) -> Result<()>;

    async fn delete_all(&self, kind: EntityKind) -> Result<()>;

    /// DDL of the underlying store, if it can be introspected.
    async fn describe_schema(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Opens a transaction spanning the following calls. Returns `false` when
    /// the store has no transaction support, in which case `commit` and
    /// `rollback` are no-ops.
    async fn begin(&self) -> Result<bool> {
        Ok(false)
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}
