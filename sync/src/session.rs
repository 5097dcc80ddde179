//! The sync session: entry point for every mutation and read.
//!
//! A mutation is validated, applied to the local mirror, and then either
//! written to the remote store or queued in the pending log:
//!
//! - offline: queued
//! - online with an empty log and no pass running: written directly, and
//!   queued if the remote write fails
//! - online with anything still queued: queued behind it
//!
//! The mirror is updated before any remote call is made, so reads show the
//! change immediately. A mirror that cannot be saved does not stop the
//! change: it is still sent or queued, and the failure is published as
//! [`Notice::LocalSaveFailed`].

use crate::connectivity::Connectivity;
use crate::context::SyncContext;
use crate::error::{Result, StorageError, SyncError};
use crate::mirror::LocalMirrorStore;
use crate::notice::{Delivery, Notice};
use crate::pending::PendingOperationLog;
use crate::reconcile::{send, ReconciliationRunner};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;
use vestry_engine::{
    apply_operation, EntityRecord, EntityType, Fields, Operation, ReconcileReport, RecordId,
};

const NOTICE_CAPACITY: usize = 64;

/// Result of a create, update, or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub entity_type: EntityType,
    /// Id of the record, as known after the call
    pub record_id: RecordId,
    pub delivery: Delivery,
    /// Whether the local mirror stored the change durably
    pub saved_locally: bool,
}

/// Owns the mirror store, the pending log, and the reconciliation runner.
#[derive(Clone)]
pub struct SyncSession {
    ctx: SyncContext,
    mirror: Arc<LocalMirrorStore>,
    log: Arc<PendingOperationLog>,
    runner: Arc<ReconciliationRunner>,
    notices: broadcast::Sender<Notice>,
}

impl SyncSession {
    pub fn open(ctx: SyncContext) -> Self {
        let mirror = Arc::new(LocalMirrorStore::new(&ctx));
        let log = Arc::new(PendingOperationLog::new(&ctx));
        let runner = Arc::new(ReconciliationRunner::new(&ctx, mirror.clone(), log.clone()));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            ctx,
            mirror,
            log,
            runner,
            notices,
        }
    }

    /// Create a record under a fresh client-generated id.
    pub async fn create(&self, entity_type: &str, fields: Fields) -> Result<MutationOutcome> {
        let record = EntityRecord::new(Uuid::new_v4().to_string(), fields);
        self.mutate(entity_type, Operation::insert(record)).await
    }

    /// Merge `fields` into an existing record.
    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        fields: Fields,
    ) -> Result<MutationOutcome> {
        self.mutate(entity_type, Operation::update(id, fields)).await
    }

    pub async fn delete(&self, entity_type: &str, id: &str) -> Result<MutationOutcome> {
        self.mutate(entity_type, Operation::delete(id)).await
    }

    /// Records as the mirror currently has them.
    pub async fn records(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.mirror.read(entity_type).await
    }

    /// Pull the remote's records and rebase pending changes on top.
    ///
    /// Offline, or when the fetch fails, the mirror is returned unchanged.
    pub async fn refresh(&self, entity_type: &str) -> Result<Vec<EntityRecord>> {
        if !self.ctx.connectivity.is_online() {
            return Ok(self.mirror.read(entity_type).await);
        }

        let mut records = match self.ctx.remote.fetch_all(entity_type).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(entity_type, error = %e, "Refresh failed, keeping local copy");
                return Ok(self.mirror.read(entity_type).await);
            }
        };

        for entry in self.log.entries_for(entity_type).await {
            if let Err(e) = apply_operation(entity_type, &mut records, &entry.operation) {
                tracing::debug!(seq = entry.seq, error = %e, "Pending entry skipped on rebase");
            }
        }

        self.mirror.write(entity_type, records.clone()).await?;
        Ok(records)
    }

    /// Replay the pending log now.
    ///
    /// `None` when a pass was already running.
    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        let report = self.runner.run().await?;
        if !report.is_empty() {
            self.notify(Notice::Reconciled(report.clone()));
        }
        Some(report)
    }

    /// Reconcile once on every transition from offline to online.
    ///
    /// The watch channel keeps only the latest state, so a drop and a
    /// recovery that both land before the task wakes up arrive as a single
    /// change. The signal publishes transitions only, which means waking up
    /// to `Online` always follows a recovery, coalesced or not.
    pub fn spawn_connectivity_watcher(&self) -> JoinHandle<()> {
        let session = self.clone();
        let mut rx = self.ctx.connectivity.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = *rx.borrow_and_update();
                if current == Connectivity::Online {
                    session.reconcile().await;
                }
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.log.len().await
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    async fn mutate(&self, entity_type: &str, operation: Operation) -> Result<MutationOutcome> {
        self.ctx
            .settings
            .schema
            .validate_operation(entity_type, &operation)?;

        let kind = operation.kind();
        let mut record_id = operation.record_id().clone();

        let mut saved_locally = match self.mirror.apply(entity_type, &operation).await {
            Ok(()) => true,
            Err(SyncError::Storage(e)) => {
                self.notify(Notice::LocalSaveFailed(e.to_string()));
                false
            }
            Err(e) => return Err(e),
        };

        let delivery = if self.must_queue().await {
            self.queue(entity_type, operation).await?
        } else {
            match send(self.ctx.remote.as_ref(), entity_type, &operation).await {
                Ok(stored) => {
                    if let Some(stored) = stored {
                        let stored_id = stored.id.clone();
                        if let Err(e) = self.adopt(entity_type, &record_id, stored).await {
                            self.notify(Notice::LocalSaveFailed(e.to_string()));
                            saved_locally = false;
                        }
                        record_id = stored_id;
                    }
                    Delivery::Synced
                }
                Err(e) => {
                    tracing::warn!(
                        entity_type,
                        record_id = %record_id,
                        error = %e,
                        "Remote write failed, queued for later"
                    );
                    if e.is_transient() {
                        self.ctx.connectivity.set(Connectivity::Offline);
                    }
                    self.queue(entity_type, operation).await?
                }
            }
        };

        self.notify(Notice::Saved {
            entity_type: entity_type.to_string(),
            kind,
            delivery,
        });
        Ok(MutationOutcome {
            entity_type: entity_type.to_string(),
            record_id,
            delivery,
            saved_locally,
        })
    }

    /// Replace the local copy of a directly inserted record with the
    /// remote's, following the id the remote assigned.
    async fn adopt(
        &self,
        entity_type: &str,
        local_id: &str,
        stored: EntityRecord,
    ) -> std::result::Result<(), StorageError> {
        if stored.id != local_id {
            tracing::info!(entity_type, from = local_id, to = %stored.id, "Remote assigned a new record id");
            self.mirror.remap(entity_type, local_id, &stored.id).await?;
        }
        self.mirror.upsert(entity_type, stored).await
    }

    /// Direct writes must not overtake anything already queued.
    async fn must_queue(&self) -> bool {
        !self.ctx.connectivity.is_online()
            || self.runner.is_running()
            || !self.log.is_empty().await
    }

    async fn queue(&self, entity_type: &str, operation: Operation) -> Result<Delivery> {
        self.log
            .enqueue(entity_type, operation)
            .await
            .map_err(SyncError::from)
            .inspect_err(|e| self.report_local_failure(e))?;
        Ok(Delivery::Queued)
    }

    fn report_local_failure(&self, err: &SyncError) {
        if let SyncError::Storage(cause) = err {
            self.notify(Notice::LocalSaveFailed(cause.to_string()));
        }
    }

    fn notify(&self, notice: Notice) {
        tracing::debug!(notice = %notice, "Notice");
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivitySignal;
    use crate::error::RemoteError;
    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use vestry_engine::Schema;

    fn session(state: Connectivity) -> (SyncSession, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let ctx = SyncContext::new(
            Arc::new(MemoryStorage::new()),
            remote.clone(),
            ConnectivitySignal::new(state),
        );
        (SyncSession::open(ctx), remote)
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn online_create_is_synced() {
        let (session, remote) = session(Connectivity::Online);
        let mut notices = session.subscribe();

        let outcome = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap();

        assert_eq!(outcome.delivery, Delivery::Synced);
        assert_eq!(remote.records("members")[0].id, outcome.record_id);
        assert_eq!(notices.recv().await.unwrap().to_string(), "Member added");
    }

    #[tokio::test]
    async fn offline_create_is_queued() {
        let (session, remote) = session(Connectivity::Offline);
        let mut notices = session.subscribe();

        let outcome = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap();

        assert_eq!(outcome.delivery, Delivery::Queued);
        assert!(remote.calls().is_empty());
        assert_eq!(session.pending_count().await, 1);
        assert_eq!(
            notices.recv().await.unwrap().to_string(),
            "Member added (offline mode)"
        );
    }

    #[tokio::test]
    async fn failed_remote_write_is_queued_and_goes_offline() {
        let (session, remote) = session(Connectivity::Online);
        remote.set_reachable(false);

        let outcome = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap();

        assert_eq!(outcome.delivery, Delivery::Queued);
        assert_eq!(session.pending_count().await, 1);
        assert!(!session.context().connectivity.is_online());
    }

    #[tokio::test]
    async fn schema_violation_changes_nothing() {
        let (session, remote) = session(Connectivity::Online);
        let ctx = session.context().clone();
        let mut settings = ctx.settings.clone();
        settings.schema = Schema::parish();
        let session = SyncSession::open(ctx.with_settings(settings));

        let err = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Engine(_)));
        assert!(session.records("members").await.is_empty());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails_locally() {
        let (session, _) = session(Connectivity::Online);
        let err = session
            .update("members", "ghost", fields(json!({"status": "inactive"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Engine(_)));
    }

    #[tokio::test]
    async fn refresh_offline_returns_mirror() {
        let (session, remote) = session(Connectivity::Offline);
        remote.seed(
            "members",
            vec![EntityRecord::new("r-1", fields(json!({"first_name": "Lydia"})))],
        );

        assert!(session.refresh("members").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mirror_save_failure_still_reaches_remote() {
        let storage = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemote::new());
        let session = SyncSession::open(SyncContext::new(
            storage.clone(),
            remote.clone(),
            ConnectivitySignal::new(Connectivity::Online),
        ));
        let mut notices = session.subscribe();
        storage.set_reject_writes(true);

        let outcome = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap();

        assert_eq!(outcome.delivery, Delivery::Synced);
        assert!(!outcome.saved_locally);
        assert_eq!(remote.records("members")[0].id, outcome.record_id);
        assert!(matches!(notices.recv().await.unwrap(), Notice::LocalSaveFailed(_)));
    }

    /// Remote that fills in a server-side default on insert.
    struct DefaultingRemote(MemoryRemote);

    #[async_trait::async_trait]
    impl RemoteStore for DefaultingRemote {
        async fn insert(
            &self,
            entity_type: &str,
            mut record: EntityRecord,
        ) -> std::result::Result<EntityRecord, RemoteError> {
            record.fields.insert("status".into(), json!("active"));
            self.0.insert(entity_type, record).await
        }

        async fn update(
            &self,
            entity_type: &str,
            id: &str,
            fields: Fields,
        ) -> std::result::Result<(), RemoteError> {
            self.0.update(entity_type, id, fields).await
        }

        async fn delete(&self, entity_type: &str, id: &str) -> std::result::Result<(), RemoteError> {
            self.0.delete(entity_type, id).await
        }

        async fn fetch_all(
            &self,
            entity_type: &str,
        ) -> std::result::Result<Vec<EntityRecord>, RemoteError> {
            self.0.fetch_all(entity_type).await
        }

        async fn health_check(&self) -> std::result::Result<(), RemoteError> {
            self.0.health_check().await
        }
    }

    #[tokio::test]
    async fn stored_record_replaces_local_copy() {
        let session = SyncSession::open(SyncContext::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(DefaultingRemote(MemoryRemote::new())),
            ConnectivitySignal::new(Connectivity::Online),
        ));

        let outcome = session
            .create("members", fields(json!({"first_name": "Esther"})))
            .await
            .unwrap();

        assert!(outcome.saved_locally);
        let records = session.records("members").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["status"], "active");
    }

    #[tokio::test]
    async fn watcher_catches_a_coalesced_recovery() {
        let (session, remote) = session(Connectivity::Online);
        let watcher = session.spawn_connectivity_watcher();
        tokio::task::yield_now().await;

        session
            .log
            .enqueue(
                "members",
                Operation::insert(EntityRecord::new("m-1", fields(json!({"first_name": "Anna"})))),
            )
            .await
            .unwrap();
        let signal = &session.context().connectivity;
        signal.set(Connectivity::Offline);
        signal.set(Connectivity::Online);

        for _ in 0..100 {
            if session.pending_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        watcher.abort();

        assert_eq!(session.pending_count().await, 0);
        assert_eq!(remote.records("members").len(), 1);
    }

    #[tokio::test]
    async fn assigned_id_is_reported() {
        let (session, remote) = session(Connectivity::Online);
        remote.set_assigns_ids(true);

        let outcome = session
            .create("events", fields(json!({"title": "Harvest"})))
            .await
            .unwrap();

        assert_eq!(outcome.record_id, "srv-1");
        assert_eq!(session.records("events").await[0].id, "srv-1");
    }
}
