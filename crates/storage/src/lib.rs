mod entities;
pub mod postgres_store;
pub mod sqlite_entities;
pub mod sqlite_store;
pub mod store;

pub use entities::EntityRepository;
pub use postgres_store::PostgresRecordStore;
pub use sqlite_entities::SqliteEntityStore;
pub use sqlite_store::SqliteRecordStore;
pub use store::RecordStore;
