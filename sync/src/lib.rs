//! # Vestry Sync
//!
//! Offline-first synchronization for the Vestry church administration
//! client. Every change lands in a durable local mirror first; when the
//! remote store cannot be reached it waits in a pending operation log and is
//! replayed, in order, once connectivity returns.
//!
//! Build a [`SyncContext`] from a [`DurableStorage`], a [`RemoteStore`] and a
//! [`ConnectivitySignal`], then open a [`SyncSession`] over it.

pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod mirror;
pub mod notice;
pub mod pending;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod storage;

pub use config::{Config, ConfigError};
pub use connectivity::{Connectivity, ConnectivitySignal};
pub use context::{SyncContext, SyncSettings};
pub use error::{ReconciliationEntryError, RemoteError, Result, StorageError, SyncError};
pub use mirror::LocalMirrorStore;
pub use notice::{Delivery, Notice};
pub use pending::PendingOperationLog;
pub use reconcile::ReconciliationRunner;
pub use remote::{MemoryRemote, PgRemoteStore, RemoteStore};
pub use session::{MutationOutcome, SyncSession};
pub use storage::{DurableStorage, FileStorage, MemoryStorage};
