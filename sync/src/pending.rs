//! Durable pending operation log.

use crate::context::{now_millis, SyncContext};
use crate::error::StorageError;
use crate::storage::{quarantine, DurableStorage};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use vestry_engine::{
    LogSnapshot, Operation, PendingEntry, PendingLog, Sequence, PENDING_LOG_KEY,
};

/// FIFO of operations waiting to reach the remote store.
///
/// Every change rewrites the whole log under one key. The mutex serializes
/// the read-modify-write cycles, so concurrent enqueues never lose entries.
///
/// The stored log is only ever overwritten after it has been read
/// successfully. A failed read leaves nothing cached and fails every change
/// until a later read works; an unreadable value is quarantined first.
pub struct PendingOperationLog {
    storage: Arc<dyn DurableStorage>,
    log: Mutex<Option<PendingLog>>,
}

impl PendingOperationLog {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            storage: ctx.storage.clone(),
            log: Mutex::new(None),
        }
    }

    /// Append an operation stamped with the current time.
    ///
    /// If persisting fails, the entry stays in memory and is still replayed
    /// while this process runs.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        operation: Operation,
    ) -> Result<PendingEntry, StorageError> {
        let mut guard = self.lock().await?;
        let log = loaded(&mut guard);
        let entry = log.enqueue(entity_type, operation, now_millis()).clone();
        tracing::debug!(
            seq = entry.seq,
            entity_type = %entry.entity_type,
            kind = %entry.operation.kind(),
            "Queued operation"
        );
        self.persist(log).await?;
        Ok(entry)
    }

    /// Every entry in insertion order. Nothing is removed.
    pub async fn drain_in_order(&self) -> Vec<PendingEntry> {
        self.entries_after(None).await
    }

    /// Entries enqueued after `seq`, in order. Empty while the log cannot
    /// be read.
    pub async fn entries_after(&self, seq: Option<Sequence>) -> Vec<PendingEntry> {
        self.read(|log| log.entries_after(seq))
            .await
            .unwrap_or_default()
    }

    /// Entries of one entity type, in order.
    pub async fn entries_for(&self, entity_type: &str) -> Vec<PendingEntry> {
        self.read(|log| log.entries_for(entity_type).cloned().collect())
            .await
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.read(PendingLog::len).await.unwrap_or_default()
    }

    /// Whether nothing is queued. A log that cannot be read is not empty.
    pub async fn is_empty(&self) -> bool {
        self.read(PendingLog::is_empty).await.unwrap_or(false)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self.lock().await?;
        let log = loaded(&mut guard);
        log.clear();
        self.persist(log).await
    }

    /// Close a pass over the entries `after < seq <= through`.
    pub async fn settle(
        &self,
        after: Option<Sequence>,
        through: Sequence,
        requeue: Vec<PendingEntry>,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock().await?;
        let log = loaded(&mut guard);
        log.settle(after, through, requeue);
        self.persist(log).await
    }

    /// Point queued entries for `from` at `to`.
    pub async fn rewrite_record_id(
        &self,
        entity_type: &str,
        from: &str,
        to: &str,
    ) -> Result<usize, StorageError> {
        let mut guard = self.lock().await?;
        let log = loaded(&mut guard);
        let rewritten = log.rewrite_record_id(entity_type, from, to);
        if rewritten > 0 {
            self.persist(log).await?;
        }
        Ok(rewritten)
    }

    async fn read<R>(&self, f: impl FnOnce(&PendingLog) -> R) -> Option<R> {
        match self.lock().await {
            Ok(mut guard) => Some(f(loaded(&mut guard))),
            Err(e) => {
                tracing::warn!(error = %e, "Pending log is unreadable");
                None
            }
        }
    }

    /// Lock the log, loading it from storage if it is not cached yet.
    async fn lock(&self) -> Result<MutexGuard<'_, Option<PendingLog>>, StorageError> {
        let mut guard = self.log.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard)
    }

    async fn load(&self) -> Result<PendingLog, StorageError> {
        let Some(json) = self.storage.get(PENDING_LOG_KEY).await? else {
            return Ok(PendingLog::new());
        };

        match LogSnapshot::from_json(&json) {
            Ok(snapshot) => Ok(snapshot.log),
            Err(e) => {
                quarantine(
                    self.storage.as_ref(),
                    PENDING_LOG_KEY,
                    &json,
                    &e.to_string(),
                    now_millis(),
                )
                .await?;
                Ok(PendingLog::new())
            }
        }
    }

    async fn persist(&self, log: &PendingLog) -> Result<(), StorageError> {
        let json = LogSnapshot::new(log.clone())
            .to_json()
            .map_err(|e| StorageError::Encode(e.to_string()))?;

        self.storage
            .set(PENDING_LOG_KEY, &json)
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Failed to persist pending log");
            })
    }
}

fn loaded<'a>(guard: &'a mut MutexGuard<'_, Option<PendingLog>>) -> &'a mut PendingLog {
    guard.get_or_insert_with(PendingLog::new)
}
