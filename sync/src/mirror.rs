//! Local mirror store.
//!
//! Keeps the last known records of each entity type in memory and writes
//! every change through to durable storage. Reads are served from memory,
//! falling back to storage the first time an entity type is touched.
//!
//! An entity type is only cached once its stored value was read. Until then
//! changes to it fail instead of overwriting records that could not be
//! loaded. Unreadable values are quarantined before the key is reused.

use crate::context::{now_millis, SyncContext};
use crate::error::{StorageError, SyncError};
use crate::storage::{quarantine, DurableStorage};
use std::sync::Arc;
use tokio::sync::Mutex;
use vestry_engine::{mirror_key, EntityRecord, Mirror, MirrorSnapshot, Operation};

/// Durable, write-through cache of entity records.
pub struct LocalMirrorStore {
    storage: Arc<dyn DurableStorage>,
    cache: Mutex<Mirror>,
}

impl LocalMirrorStore {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            storage: ctx.storage.clone(),
            cache: Mutex::new(Mirror::new()),
        }
    }

    /// Cached records of an entity type. Never fails: anything unreadable
    /// is logged and treated as empty.
    pub async fn read(&self, entity_type: &str) -> Vec<EntityRecord> {
        let mut cache = self.cache.lock().await;
        if let Err(e) = self.load(&mut cache, entity_type).await {
            tracing::warn!(entity_type, error = %e, "Mirror is unreadable");
            return Vec::new();
        }
        cache.records(entity_type).to_vec()
    }

    /// Replace the cached records of an entity type.
    ///
    /// The in-memory copy is updated even when persisting fails.
    pub async fn write(
        &self,
        entity_type: &str,
        records: Vec<EntityRecord>,
    ) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().await;
        cache.replace(entity_type, records);
        self.persist(&cache, entity_type).await
    }

    /// Apply one operation optimistically.
    ///
    /// Engine errors (duplicate insert, unknown record) leave everything
    /// untouched. Storage errors leave the in-memory change in place.
    pub async fn apply(&self, entity_type: &str, operation: &Operation) -> Result<(), SyncError> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache, entity_type).await?;
        cache.apply(entity_type, operation)?;
        self.persist(&cache, entity_type).await?;
        Ok(())
    }

    /// Store the authoritative version of a record.
    pub async fn upsert(&self, entity_type: &str, record: EntityRecord) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache, entity_type).await?;
        cache.upsert(entity_type, record);
        self.persist(&cache, entity_type).await
    }

    /// Rename a cached record. Returns whether the record was found.
    pub async fn remap(&self, entity_type: &str, from: &str, to: &str) -> Result<bool, StorageError> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache, entity_type).await?;
        if !cache.remap(entity_type, from, to) {
            return Ok(false);
        }
        self.persist(&cache, entity_type).await?;
        Ok(true)
    }

    async fn load(&self, cache: &mut Mirror, entity_type: &str) -> Result<(), StorageError> {
        if cache.contains(entity_type) {
            return Ok(());
        }

        let key = mirror_key(entity_type);
        let records = match self.storage.get(&key).await? {
            Some(json) => match MirrorSnapshot::from_json(&json, entity_type) {
                Ok(snapshot) => snapshot.records,
                Err(e) => {
                    quarantine(
                        self.storage.as_ref(),
                        &key,
                        &json,
                        &e.to_string(),
                        now_millis(),
                    )
                    .await?;
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        cache.replace(entity_type, records);
        Ok(())
    }

    async fn persist(&self, cache: &Mirror, entity_type: &str) -> Result<(), StorageError> {
        let key = mirror_key(entity_type);
        let json = MirrorSnapshot::new(entity_type, cache.records(entity_type).to_vec())
            .to_json()
            .map_err(|e| StorageError::Encode(e.to_string()))?;

        self.storage.set(&key, &json).await.inspect_err(|e| {
            tracing::error!(key = %key, error = %e, "Failed to persist mirror");
        })
    }
}
