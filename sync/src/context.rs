//! Shared collaborators of the sync layer.

use crate::connectivity::ConnectivitySignal;
use crate::remote::RemoteStore;
use crate::storage::DurableStorage;
use std::sync::Arc;
use vestry_engine::{RetryPolicy, Schema, Timestamp};

/// Tunables of a sync session.
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    /// What happens to entries that fail to replay
    pub retry: RetryPolicy,
    /// Field validation applied before any mutation
    pub schema: Schema,
}

/// Everything the mirror store, the pending log, and the reconciliation
/// runner need, handed to their constructors explicitly.
#[derive(Clone)]
pub struct SyncContext {
    pub storage: Arc<dyn DurableStorage>,
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: ConnectivitySignal,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(
        storage: Arc<dyn DurableStorage>,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self {
            storage,
            remote,
            connectivity,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
