//! The authoritative remote store.

mod memory;
mod postgres;

pub use memory::{MemoryRemote, RemoteCall};
pub use postgres::{create_pool, run_migrations, PgRemoteStore, Pool, StoredRecord};

use crate::error::RemoteError;
use async_trait::async_trait;
use vestry_engine::{EntityRecord, Fields};

/// Hosted backend persisting entity records.
///
/// Every call may fail with a network or authorization error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record, keeping its id when the backend accepts client ids.
    /// Returns the record as stored.
    async fn insert(
        &self,
        entity_type: &str,
        record: EntityRecord,
    ) -> Result<EntityRecord, RemoteError>;

    /// Merge `fields` into the record with `id`.
    async fn update(&self, entity_type: &str, id: &str, fields: Fields)
        -> Result<(), RemoteError>;

    /// Remove the record with `id`.
    async fn delete(&self, entity_type: &str, id: &str) -> Result<(), RemoteError>;

    /// All records of an entity type.
    async fn fetch_all(&self, entity_type: &str) -> Result<Vec<EntityRecord>, RemoteError>;

    /// Cheap reachability check used by the connectivity probe.
    async fn health_check(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}
