//! Mutations expressed as operations.
//!
//! Every create/update/delete becomes an [`Operation`]. Operations are applied
//! optimistically to the local mirror and, when the remote write cannot be
//! made, recorded in the pending log as a [`PendingEntry`].

use crate::{
    record::{strip_id, Fields},
    EntityRecord, EntityType, RecordId, Sequence, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mutation of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    /// Insert a new record (carrying its client-generated id)
    Insert { record: EntityRecord },
    /// Merge fields into an existing record
    Update { id: RecordId, fields: Fields },
    /// Remove a record
    Delete { id: RecordId },
}

/// The kind of an operation, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl Operation {
    /// Insert operation for a record.
    pub fn insert(record: EntityRecord) -> Self {
        Operation::Insert { record }
    }

    /// Update operation; any `id` key in `fields` is dropped.
    pub fn update(id: impl Into<RecordId>, fields: Fields) -> Self {
        Operation::Update {
            id: id.into(),
            fields: strip_id(fields),
        }
    }

    /// Delete operation.
    pub fn delete(id: impl Into<RecordId>) -> Self {
        Operation::Delete { id: id.into() }
    }

    /// Get the record ID this operation targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Operation::Insert { record } => &record.id,
            Operation::Update { id, .. } => id,
            Operation::Delete { id } => id,
        }
    }

    /// Get the operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }

    /// Point the operation at a different record id.
    pub fn set_record_id(&mut self, new_id: impl Into<RecordId>) {
        let new_id = new_id.into();
        match self {
            Operation::Insert { record } => record.id = new_id,
            Operation::Update { id, .. } => *id = new_id,
            Operation::Delete { id } => *id = new_id,
        }
    }
}

/// An operation waiting in the pending log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    /// Position in the log, assigned on enqueue and never reused
    pub seq: Sequence,
    /// Entity type the operation targets
    pub entity_type: EntityType,
    /// The mutation
    pub operation: Operation,
    /// When the entry was enqueued (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Failed replay attempts so far
    #[serde(default)]
    pub attempts: u32,
}

impl PendingEntry {
    /// Whether this entry targets the given record.
    pub fn targets(&self, entity_type: &str, id: &str) -> bool {
        self.entity_type == entity_type && self.operation.record_id() == id
    }
}
