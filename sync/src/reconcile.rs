//! Reconciliation runner.
//!
//! Replays the pending log against the remote store, strictly in order and
//! one entry at a time. A failed entry is logged and counted; it never stops
//! the pass. Once every entry has been looked at, the log is settled.

use crate::connectivity::ConnectivitySignal;
use crate::context::SyncContext;
use crate::error::{ReconciliationEntryError, RemoteError};
use crate::mirror::LocalMirrorStore;
use crate::pending::PendingOperationLog;
use crate::remote::RemoteStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use vestry_engine::{
    EntityRecord, Operation, PendingEntry, ReconcileReport, Reconciliation, RetryPolicy, Sequence,
    Step,
};

/// Send one operation to the remote.
///
/// Inserts return the record as the remote stored it, which may carry an id
/// other than the client's.
pub(crate) async fn send(
    remote: &dyn RemoteStore,
    entity_type: &str,
    operation: &Operation,
) -> Result<Option<EntityRecord>, RemoteError> {
    match operation {
        Operation::Insert { record } => {
            let stored = remote.insert(entity_type, record.clone()).await?;
            return Ok(Some(stored));
        }
        Operation::Update { id, fields } => {
            remote.update(entity_type, id, fields.clone()).await?;
        }
        Operation::Delete { id } => {
            remote.delete(entity_type, id).await?;
        }
    }
    Ok(None)
}

/// Drives replay passes over the pending log.
pub struct ReconciliationRunner {
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivitySignal,
    policy: RetryPolicy,
    mirror: Arc<LocalMirrorStore>,
    log: Arc<PendingOperationLog>,
    running: Mutex<()>,
}

impl ReconciliationRunner {
    pub fn new(
        ctx: &SyncContext,
        mirror: Arc<LocalMirrorStore>,
        log: Arc<PendingOperationLog>,
    ) -> Self {
        Self {
            remote: ctx.remote.clone(),
            connectivity: ctx.connectivity.clone(),
            policy: ctx.settings.retry,
            mirror,
            log,
            running: Mutex::new(()),
        }
    }

    /// Whether a pass is in progress.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Replay the pending log.
    ///
    /// Returns `None` without doing anything when a pass is already running.
    /// Entries enqueued while a pass runs are picked up by a follow-up pass
    /// as long as the remote is still considered reachable. Follow-up passes
    /// share the run's bookkeeping, so a record that failed earlier in the
    /// run keeps its later entries deferred.
    pub async fn run(&self) -> Option<ReconcileReport> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("Reconciliation already running");
            return None;
        };

        let mut total = ReconcileReport::default();
        let mut reconciliation = Reconciliation::new(self.policy);
        let mut after: Option<Sequence> = None;
        let mut entries = self.log.drain_in_order().await;

        while !entries.is_empty() {
            tracing::info!(entries = entries.len(), "Reconciling pending operations");
            self.pass(&mut reconciliation, entries).await;
            let outcome = reconciliation.take_outcome();
            total.absorb(outcome.report);

            let Some(through) = outcome.through else {
                break;
            };
            if let Err(e) = self.log.settle(after, through, outcome.requeue).await {
                tracing::error!(error = %e, "Failed to settle pending log");
                break;
            }
            after = Some(through);

            if !self.connectivity.is_online() {
                break;
            }
            entries = self.log.entries_after(after).await;
        }

        if !total.is_empty() {
            tracing::info!(
                succeeded = total.success_count,
                failed = total.error_count,
                deferred = total.deferred_count,
                dropped = total.dropped_count,
                "Reconciliation finished"
            );
        }
        Some(total)
    }

    async fn pass(&self, reconciliation: &mut Reconciliation, entries: Vec<PendingEntry>) {
        let mut queue = VecDeque::from(entries);

        while let Some(entry) = queue.pop_front() {
            if reconciliation.step(&entry) == Step::Defer {
                tracing::debug!(seq = entry.seq, "Deferring entry behind a failed one");
                reconciliation.deferred(entry);
                continue;
            }

            match send(self.remote.as_ref(), &entry.entity_type, &entry.operation).await {
                Ok(stored) => {
                    reconciliation.succeeded(&entry);
                    let from = entry.operation.record_id();
                    let Some(to) = stored.map(|r| r.id).filter(|id| id != from) else {
                        continue;
                    };
                    for later in queue.iter_mut() {
                        if later.targets(&entry.entity_type, from) {
                            later.operation.set_record_id(to.clone());
                        }
                    }
                    reconciliation.rewrite_record_id(&entry.entity_type, from, &to);
                    self.remap(&entry.entity_type, from, &to).await;
                }
                Err(source) => {
                    let message = source.to_string();
                    let err = ReconciliationEntryError {
                        seq: entry.seq,
                        kind: entry.operation.kind(),
                        entity_type: entry.entity_type.clone(),
                        record_id: entry.operation.record_id().clone(),
                        source,
                    };
                    tracing::warn!(error = %err, "Pending entry failed");
                    reconciliation.failed(entry, message);
                }
            }
        }
    }

    /// Follow a remote-assigned id through the mirror and the stored log.
    async fn remap(&self, entity_type: &str, from: &str, to: &str) {
        tracing::info!(entity_type, from, to, "Remote assigned a new record id");
        if let Err(e) = self.mirror.remap(entity_type, from, to).await {
            tracing::error!(error = %e, "Failed to remap mirror record");
        }
        if let Err(e) = self.log.rewrite_record_id(entity_type, from, to).await {
            tracing::error!(error = %e, "Failed to rewrite pending entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::remote::MemoryRemote;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use vestry_engine::Fields;

    struct Harness {
        remote: Arc<MemoryRemote>,
        mirror: Arc<LocalMirrorStore>,
        log: Arc<PendingOperationLog>,
        runner: ReconciliationRunner,
    }

    fn harness(policy: RetryPolicy) -> Harness {
        let remote = Arc::new(MemoryRemote::new());
        let mut ctx = SyncContext::new(
            Arc::new(MemoryStorage::new()),
            remote.clone(),
            ConnectivitySignal::new(Connectivity::Online),
        );
        ctx.settings.retry = policy;

        let mirror = Arc::new(LocalMirrorStore::new(&ctx));
        let log = Arc::new(PendingOperationLog::new(&ctx));
        let runner = ReconciliationRunner::new(&ctx, mirror.clone(), log.clone());
        Harness {
            remote,
            mirror,
            log,
            runner,
        }
    }

    fn member(id: &str) -> EntityRecord {
        EntityRecord::new(id, json!({"first_name": "Ruth"}).as_object().cloned().unwrap())
    }

    fn patch(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn empty_log_is_a_no_op() {
        let h = harness(RetryPolicy::Drop);
        let report = h.runner.run().await.unwrap();

        assert!(report.is_empty());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn replays_in_order_and_clears() {
        let h = harness(RetryPolicy::Drop);
        h.log.enqueue("members", Operation::insert(member("a"))).await.unwrap();
        h.log
            .enqueue("members", Operation::update("a", patch(json!({"first_name": "Naomi"}))))
            .await
            .unwrap();

        let report = h.runner.run().await.unwrap();

        assert_eq!(report.success_count, 2);
        assert!(h.log.is_empty().await);
        assert_eq!(h.remote.records("members")[0].fields["first_name"], "Naomi");
    }

    #[tokio::test]
    async fn concurrent_run_is_refused() {
        let h = harness(RetryPolicy::Drop);
        let _held = h.runner.running.lock().await;

        assert!(h.runner.is_running());
        assert!(h.runner.run().await.is_none());
    }

    #[tokio::test]
    async fn remote_assigned_id_is_followed() {
        let h = harness(RetryPolicy::Drop);
        h.remote.set_assigns_ids(true);
        h.mirror
            .apply("members", &Operation::insert(member("tmp")))
            .await
            .unwrap();
        h.log.enqueue("members", Operation::insert(member("tmp"))).await.unwrap();
        h.log
            .enqueue("members", Operation::update("tmp", patch(json!({"status": "active"}))))
            .await
            .unwrap();

        let report = h.runner.run().await.unwrap();

        assert_eq!(report.success_count, 2);
        let calls: Vec<_> = h.remote.calls().iter().map(ToString::to_string).collect();
        assert_eq!(calls, vec!["insert tmp", "update srv-1"]);
        assert_eq!(h.mirror.read("members").await[0].id, "srv-1");
    }

    #[tokio::test]
    async fn requeue_policy_keeps_failed_entries() {
        let h = harness(RetryPolicy::Requeue { max_attempts: 3 });
        h.remote.reject_writes_for("bad");
        h.log.enqueue("members", Operation::insert(member("bad"))).await.unwrap();
        h.log.enqueue("members", Operation::insert(member("good"))).await.unwrap();
        h.log
            .enqueue("members", Operation::update("bad", Fields::new()))
            .await
            .unwrap();

        let report = h.runner.run().await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.deferred_count, 1);
        let left: Vec<_> = h
            .log
            .drain_in_order()
            .await
            .iter()
            .map(|e| (e.seq, e.attempts))
            .collect();
        assert_eq!(left, vec![(1, 1), (3, 0)]);
    }
}
