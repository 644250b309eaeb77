//! SQLite implementations of storage interfaces.

mod catalog_store;
mod replica_store;

pub use catalog_store::SqliteCatalogStore;
pub use replica_store::SqliteReplicaStore;
