//! In-memory local mirror.
//!
//! The mirror holds the last known records of every entity type as ordered
//! sequences. Mutations are applied here optimistically, before the remote
//! store has confirmed anything.

use crate::{error::Result, EntityRecord, EntityType, Error, Operation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Apply one operation to a record sequence.
///
/// Inserts append, updates merge fields into the matching record, deletes
/// remove it. Nothing is changed when an error is returned.
pub fn apply_operation(
    entity_type: &str,
    records: &mut Vec<EntityRecord>,
    operation: &Operation,
) -> Result<()> {
    match operation {
        Operation::Insert { record } => {
            if records.iter().any(|r| r.id == record.id) {
                return Err(Error::already_exists(entity_type, &record.id));
            }
            records.push(record.clone());
        }
        Operation::Update { id, fields } => {
            let record = records
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| Error::not_found(entity_type, id))?;
            record.apply_fields(fields);
        }
        Operation::Delete { id } => {
            let position = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| Error::not_found(entity_type, id))?;
            records.remove(position);
        }
    }
    Ok(())
}

/// Cached records by entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mirror {
    entities: BTreeMap<EntityType, Vec<EntityRecord>>,
}

impl Mirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entity type has been loaded (even if it holds no records).
    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// Records of an entity type; empty when nothing is cached.
    pub fn records(&self, entity_type: &str) -> &[EntityRecord] {
        self.entities
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get one record.
    pub fn get(&self, entity_type: &str, id: &str) -> Option<&EntityRecord> {
        self.records(entity_type).iter().find(|r| r.id == id)
    }

    /// Replace the records of an entity type wholesale.
    pub fn replace(&mut self, entity_type: impl Into<EntityType>, records: Vec<EntityRecord>) {
        self.entities.insert(entity_type.into(), records);
    }

    /// Apply an operation to an entity type.
    pub fn apply(&mut self, entity_type: &str, operation: &Operation) -> Result<()> {
        let records = self.entities.entry(entity_type.to_string()).or_default();
        apply_operation(entity_type, records, operation)
    }

    /// Insert or replace a record by id, keeping its position when present.
    pub fn upsert(&mut self, entity_type: &str, record: EntityRecord) {
        let records = self.entities.entry(entity_type.to_string()).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Change the id of a cached record. Returns false when `from` is unknown.
    pub fn remap(&mut self, entity_type: &str, from: &str, to: &str) -> bool {
        let Some(records) = self.entities.get_mut(entity_type) else {
            return false;
        };
        match records.iter_mut().find(|r| r.id == from) {
            Some(record) => {
                record.id = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Entity types currently cached.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.keys()
    }
}
