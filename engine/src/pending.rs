//! The pending operation log.
//!
//! An append-only FIFO of operations that still have to reach the remote
//! store. Entries are only removed in bulk, by [`PendingLog::settle`] or
//! [`PendingLog::clear`], after a reconciliation pass has looked at them.
//! Entries are always ordered by sequence number.

use crate::{EntityType, Operation, PendingEntry, Sequence, Timestamp};
use serde::{Deserialize, Serialize};

/// Ordered log of pending operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLog {
    /// Sequence number handed to the next enqueued entry
    next_seq: Sequence,
    /// Entries in enqueue order
    entries: Vec<PendingEntry>,
}

impl PendingLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation and return the new entry.
    pub fn enqueue(
        &mut self,
        entity_type: impl Into<EntityType>,
        operation: Operation,
        timestamp: Timestamp,
    ) -> &PendingEntry {
        self.next_seq += 1;
        self.entries.push(PendingEntry {
            seq: self.next_seq,
            entity_type: entity_type.into(),
            operation,
            timestamp,
            attempts: 0,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    /// Entries enqueued after `seq` (all entries for `None`), in order.
    pub fn entries_after(&self, seq: Option<Sequence>) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|entry| seq.map_or(true, |after| entry.seq > after))
            .cloned()
            .collect()
    }

    /// Entries of one entity type, in order.
    pub fn entries_for<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a PendingEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.entity_type == entity_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest sequence number handed out so far.
    pub fn last_seq(&self) -> Sequence {
        self.next_seq
    }

    /// Remove every entry. Sequence numbers keep counting up.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Close a reconciliation pass that covered the entries with
    /// `after < seq <= through` (everything up to `through` for `None`).
    ///
    /// Those entries are removed and `requeue` takes their place, keeping the
    /// original sequence numbers. Entries outside the range stay, so the log
    /// remains ordered by sequence number.
    pub fn settle(
        &mut self,
        after: Option<Sequence>,
        through: Sequence,
        requeue: Vec<PendingEntry>,
    ) {
        let covered = |seq: Sequence| after.map_or(true, |a| seq > a) && seq <= through;
        self.entries.retain(|entry| !covered(entry.seq));
        self.entries.extend(requeue);
        self.entries.sort_by_key(|entry| entry.seq);
    }

    /// Point every entry for `from` at `to`. Returns how many were rewritten.
    pub fn rewrite_record_id(&mut self, entity_type: &str, from: &str, to: &str) -> usize {
        let mut rewritten = 0;
        for entry in &mut self.entries {
            if entry.targets(entity_type, from) {
                entry.operation.set_record_id(to);
                rewritten += 1;
            }
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityRecord, Fields};

    fn insert(id: &str) -> Operation {
        Operation::insert(EntityRecord::new(id, Fields::new()))
    }

    #[test]
    fn enqueue_assigns_increasing_seq() {
        let mut log = PendingLog::new();
        assert_eq!(log.enqueue("members", insert("a"), 1).seq, 1);
        assert_eq!(log.enqueue("members", Operation::delete("a"), 2).seq, 2);

        let seqs: Vec<_> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(log.last_seq(), 2);
    }

    #[test]
    fn clear_keeps_counting() {
        let mut log = PendingLog::new();
        log.enqueue("members", insert("a"), 1);
        log.clear();

        assert!(log.is_empty());
        assert_eq!(log.enqueue("members", insert("b"), 2).seq, 2);
    }

    #[test]
    fn entries_after_watermark() {
        let mut log = PendingLog::new();
        for id in ["a", "b", "c"] {
            log.enqueue("members", insert(id), 1);
        }

        assert_eq!(log.entries_after(None).len(), 3);
        let tail = log.entries_after(Some(1));
        assert_eq!(tail.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn settle_puts_requeued_ahead_of_newer_entries() {
        let mut log = PendingLog::new();
        log.enqueue("members", insert("a"), 1);
        log.enqueue("members", insert("b"), 1);
        let failed = log.entries()[1].clone();
        // enqueued while the pass was running
        log.enqueue("members", insert("c"), 2);

        log.settle(None, 2, vec![failed]);

        let ids: Vec<_> = log
            .entries()
            .iter()
            .map(|e| e.operation.record_id().as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn settle_leaves_entries_outside_the_pass_alone() {
        let mut log = PendingLog::new();
        log.enqueue("members", insert("a"), 1);
        log.enqueue("members", Operation::update("a", Fields::new()), 2);
        log.enqueue("members", Operation::delete("a"), 3);
        let deferred = log.entries()[1].clone();

        // a follow-up pass that only saw seq 2
        log.settle(Some(1), 2, vec![deferred]);

        let seqs: Vec<_> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        log.settle(Some(1), 2, Vec::new());
        let seqs: Vec<_> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn rewrite_record_id_only_touches_matching_entity() {
        let mut log = PendingLog::new();
        log.enqueue("members", Operation::update("tmp", Fields::new()), 1);
        log.enqueue("events", Operation::delete("tmp"), 1);

        assert_eq!(log.rewrite_record_id("members", "tmp", "srv-1"), 1);
        assert_eq!(log.entries()[0].operation.record_id(), "srv-1");
        assert_eq!(log.entries()[1].operation.record_id(), "tmp");
    }

    #[test]
    fn entries_for_filters_by_entity() {
        let mut log = PendingLog::new();
        log.enqueue("members", insert("a"), 1);
        log.enqueue("events", insert("e"), 1);

        assert_eq!(log.entries_for("members").count(), 1);
        assert_eq!(log.entries_for("tithes").count(), 0);
    }
}
