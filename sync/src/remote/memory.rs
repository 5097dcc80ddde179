//! In-process remote store for development and tests.

use super::RemoteStore;
use crate::error::RemoteError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use vestry_engine::{EntityRecord, Fields, OperationKind, RecordId};

/// A call received by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub kind: OperationKind,
    pub entity_type: String,
    pub id: RecordId,
}

impl RemoteCall {
    fn new(kind: OperationKind, entity_type: &str, id: &str) -> Self {
        Self {
            kind,
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    tables: HashMap<String, Vec<EntityRecord>>,
    calls: Vec<RemoteCall>,
    rejected_ids: HashSet<RecordId>,
    next_id: u64,
}

/// Remote store backed by in-memory tables.
///
/// It can be taken offline, told to reject writes for particular ids, and
/// switched to assign its own ids on insert. Every write attempt is
/// journaled, including the ones that fail.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    unreachable: AtomicBool,
    assigns_ids: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the network.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Ignore client ids on insert and hand out `srv-N` ids instead.
    pub fn set_assigns_ids(&self, assigns: bool) {
        self.assigns_ids.store(assigns, Ordering::SeqCst);
    }

    /// Fail every write that targets `id`.
    pub fn reject_writes_for(&self, id: impl Into<RecordId>) {
        self.state().rejected_ids.insert(id.into());
    }

    /// Write attempts in the order they arrived.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Current rows of an entity type.
    pub fn records(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.state()
            .tables
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Load rows directly, bypassing the journal.
    pub fn seed(&self, entity_type: &str, records: Vec<EntityRecord>) {
        self.state()
            .tables
            .insert(entity_type.to_string(), records);
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote is unreachable".into()));
        }
        Ok(())
    }

    /// Journal a write and apply the reachability and rejection rules.
    fn begin_write(
        &self,
        kind: OperationKind,
        entity_type: &str,
        id: &str,
    ) -> Result<MutexGuard<'_, RemoteState>, RemoteError> {
        let mut state = self.state();
        state.calls.push(RemoteCall::new(kind, entity_type, id));
        self.ensure_reachable()?;
        if state.rejected_ids.contains(id) {
            return Err(RemoteError::Rejected(format!("{kind} of {id} refused")));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert(
        &self,
        entity_type: &str,
        mut record: EntityRecord,
    ) -> Result<EntityRecord, RemoteError> {
        let mut state = self.begin_write(OperationKind::Insert, entity_type, &record.id)?;

        if self.assigns_ids.load(Ordering::SeqCst) {
            state.next_id += 1;
            record.id = format!("srv-{}", state.next_id);
        }

        let table = state.tables.entry(entity_type.to_string()).or_default();
        if table.iter().any(|r| r.id == record.id) {
            return Err(RemoteError::Rejected(format!(
                "duplicate key {}/{}",
                entity_type, record.id
            )));
        }
        table.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin_write(OperationKind::Update, entity_type, id)?;

        let record = state
            .tables
            .get_mut(entity_type)
            .and_then(|table| table.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| RemoteError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            })?;
        record.apply_fields(&fields);
        Ok(())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> Result<(), RemoteError> {
        let mut state = self.begin_write(OperationKind::Delete, entity_type, id)?;

        if let Some(table) = state.tables.get_mut(entity_type) {
            table.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn fetch_all(&self, entity_type: &str) -> Result<Vec<EntityRecord>, RemoteError> {
        self.ensure_reachable()?;
        Ok(self.records(entity_type))
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        self.ensure_reachable()
    }
}
