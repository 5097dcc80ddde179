//! Bookkeeping for replaying the pending log against the remote store.
//!
//! The remote calls themselves live outside the engine. A replay loop drives a
//! [`Reconciliation`] entry by entry, asking whether each entry should be
//! attempted and telling it how the attempt went. When the loop is done,
//! [`Reconciliation::finish`] returns the report and the entries that go back
//! into the log.
//!
//! # Retry policy
//!
//! - [`RetryPolicy::Drop`] (default): failed entries leave the log with
//!   everything else. Each failure is listed in the report.
//! - [`RetryPolicy::Requeue`]: failed entries are put back with an incremented
//!   attempt count until `max_attempts` is reached. Once an entry for a record
//!   fails, later entries for that record are deferred, so the record's
//!   operations still reach the remote in order on the next pass.

use crate::{EntityType, OperationKind, PendingEntry, RecordId, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What happens to entries whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum RetryPolicy {
    /// Failed entries are cleared with the rest of the log
    #[default]
    Drop,
    /// Failed entries are requeued until they have failed `max_attempts` times
    #[serde(rename_all = "camelCase")]
    Requeue { max_attempts: u32 },
}

/// One entry that could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFailure {
    pub seq: Sequence,
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub kind: OperationKind,
    pub message: String,
    /// Whether the entry went back into the log
    pub requeued: bool,
}

/// Aggregate outcome of one or more reconciliation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Entries the remote accepted
    pub success_count: usize,
    /// Entries whose replay failed
    pub error_count: usize,
    /// Entries not attempted because an earlier entry for the same record failed
    pub deferred_count: usize,
    /// Failed entries that left the log for good
    pub dropped_count: usize,
    /// Per-entry failure details
    pub failures: Vec<EntryFailure>,
}

impl ReconcileReport {
    /// Entries looked at, whatever the outcome.
    pub fn processed(&self) -> usize {
        self.success_count + self.error_count + self.deferred_count
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0
    }

    /// Fold another pass into this report.
    pub fn absorb(&mut self, other: ReconcileReport) {
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.deferred_count += other.deferred_count;
        self.dropped_count += other.dropped_count;
        self.failures.extend(other.failures);
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Synchronized {} change", self.success_count)?;
        if self.success_count != 1 {
            write!(f, "s")?;
        }
        if self.error_count > 0 {
            write!(f, ", {} failed", self.error_count)?;
        }
        if self.deferred_count > 0 {
            write!(f, ", {} waiting for retry", self.deferred_count)?;
        }
        Ok(())
    }
}

/// Whether the replay loop should attempt an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Replay,
    Defer,
}

/// Result of a finished pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub report: ReconcileReport,
    /// Entries to put back into the log
    pub requeue: Vec<PendingEntry>,
    /// Highest sequence number the pass looked at
    pub through: Option<Sequence>,
}

/// Accumulates the outcome of a replay run over the pending log.
///
/// A run may take several passes. [`Reconciliation::take_outcome`] closes a
/// pass; records blocked by a failure stay blocked for the later passes.
#[derive(Debug)]
pub struct Reconciliation {
    policy: RetryPolicy,
    report: ReconcileReport,
    requeue: Vec<PendingEntry>,
    /// Records with a failed entry in this run
    blocked: HashSet<(EntityType, RecordId)>,
    through: Option<Sequence>,
}

impl Reconciliation {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            report: ReconcileReport::default(),
            requeue: Vec::new(),
            blocked: HashSet::new(),
            through: None,
        }
    }

    /// Decide whether `entry` should be sent to the remote.
    pub fn step(&self, entry: &PendingEntry) -> Step {
        match self.policy {
            RetryPolicy::Requeue { .. } if self.is_blocked(entry) => Step::Defer,
            _ => Step::Replay,
        }
    }

    fn is_blocked(&self, entry: &PendingEntry) -> bool {
        self.blocked.contains(&(
            entry.entity_type.clone(),
            entry.operation.record_id().clone(),
        ))
    }

    fn observe(&mut self, entry: &PendingEntry) {
        self.through = self.through.max(Some(entry.seq));
    }

    /// The remote accepted `entry`.
    pub fn succeeded(&mut self, entry: &PendingEntry) {
        self.observe(entry);
        self.report.success_count += 1;
    }

    /// `entry` was not attempted; it goes back into the log unchanged.
    pub fn deferred(&mut self, entry: PendingEntry) {
        self.observe(&entry);
        self.report.deferred_count += 1;
        self.requeue.push(entry);
    }

    /// The remote rejected `entry`, or could not be reached.
    pub fn failed(&mut self, mut entry: PendingEntry, message: impl Into<String>) {
        self.observe(&entry);
        self.report.error_count += 1;
        entry.attempts += 1;

        let requeued = match self.policy {
            RetryPolicy::Drop => false,
            RetryPolicy::Requeue { max_attempts } => entry.attempts < max_attempts,
        };

        self.report.failures.push(EntryFailure {
            seq: entry.seq,
            entity_type: entry.entity_type.clone(),
            record_id: entry.operation.record_id().clone(),
            kind: entry.operation.kind(),
            message: message.into(),
            requeued,
        });

        if let RetryPolicy::Requeue { .. } = self.policy {
            self.blocked.insert((
                entry.entity_type.clone(),
                entry.operation.record_id().clone(),
            ));
        }

        if requeued {
            self.requeue.push(entry);
        } else {
            self.report.dropped_count += 1;
        }
    }

    /// Point entries already set aside for requeue at a new record id.
    pub fn rewrite_record_id(&mut self, entity_type: &str, from: &str, to: &str) {
        for entry in &mut self.requeue {
            if entry.targets(entity_type, from) {
                entry.operation.set_record_id(to);
            }
        }
    }

    /// Hand out the outcome of the entries seen so far and start over.
    ///
    /// Records blocked by a failure stay blocked, so a follow-up pass over
    /// newer entries cannot overtake the requeued ones.
    pub fn take_outcome(&mut self) -> PassOutcome {
        PassOutcome {
            report: std::mem::take(&mut self.report),
            requeue: std::mem::take(&mut self.requeue),
            through: self.through.take(),
        }
    }

    pub fn finish(mut self) -> PassOutcome {
        self.take_outcome()
    }
}
