//! # Vestry Engine
//!
//! Pure logic for the offline-first synchronization layer of the Vestry
//! church administration client.
//!
//! The engine knows nothing about files, networks, or clocks. It describes
//! records and mutations, applies mutations to an in-memory mirror, keeps the
//! pending operation log in order, and does the bookkeeping of a replay pass.
//! The `vestry-sync` crate supplies the IO around it.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! An [`EntityRecord`] is a flat map of named fields plus an identifier.
//! Identifiers of locally created records are generated by the client and
//! are kept when the record reaches the remote store.
//!
//! ### Operations
//!
//! Changes are expressed as an [`Operation`]:
//! - [`Operation::Insert`] - add a record
//! - [`Operation::Update`] - merge fields into a record
//! - [`Operation::Delete`] - remove a record
//!
//! ### Mirror and pending log
//!
//! The [`Mirror`] is the last known state of every entity type, mutated
//! optimistically. The [`PendingLog`] is the FIFO of operations that still
//! have to be replayed against the remote store.
//!
//! ### Reconciliation
//!
//! A [`Reconciliation`] tracks one replay pass and yields a
//! [`ReconcileReport`] plus the entries to requeue under the active
//! [`RetryPolicy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use vestry_engine::{EntityRecord, Mirror, Operation, PendingLog};
//! use serde_json::json;
//!
//! let fields = json!({"first_name": "Grace", "last_name": "Okafor"});
//! let record = EntityRecord::new("m-1", fields.as_object().cloned().unwrap());
//! let op = Operation::insert(record);
//!
//! // Apply optimistically, and queue for the remote
//! let mut mirror = Mirror::new();
//! mirror.apply("members", &op).unwrap();
//!
//! let mut log = PendingLog::new();
//! log.enqueue("members", op, 1706745600000);
//!
//! assert_eq!(mirror.records("members").len(), 1);
//! assert_eq!(log.entries()[0].seq, 1);
//! ```

pub mod error;
pub mod mirror;
pub mod operation;
pub mod pending;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use error::Error;
pub use mirror::{apply_operation, Mirror};
pub use operation::{Operation, OperationKind, PendingEntry};
pub use pending::PendingLog;
pub use reconcile::{
    EntryFailure, PassOutcome, ReconcileReport, Reconciliation, RetryPolicy, Step,
};
pub use record::{strip_id, EntityRecord, Fields, ID_FIELD};
pub use schema::{EntitySchema, FieldDef, FieldType, Schema};
pub use snapshot::{
    mirror_key, LogSnapshot, MirrorSnapshot, PENDING_LOG_KEY, SNAPSHOT_FORMAT_VERSION,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type EntityType = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
pub type Sequence = u64;
