//! Durable encodings of the local mirror and the pending log.
//!
//! Each cached entity type and the log are stored as separate JSON values in
//! a key-value store. Every value carries a format version so that a client
//! never silently misreads data written by a newer build.

use crate::{error::Result, EntityRecord, EntityType, Error, PendingLog};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Version of the stored format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Storage key of the pending log.
pub const PENDING_LOG_KEY: &str = "pending_operations";

/// Storage key of the cached records of an entity type.
pub fn mirror_key(entity_type: &str) -> String {
    format!("mirror.{entity_type}")
}

/// Cached records of one entity type, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSnapshot {
    pub format_version: u32,
    pub entity_type: EntityType,
    pub records: Vec<EntityRecord>,
}

impl MirrorSnapshot {
    pub fn new(entity_type: impl Into<EntityType>, records: Vec<EntityRecord>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entity_type: entity_type.into(),
            records,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize, checking the format version and the entity type.
    pub fn from_json(json: &str, entity_type: &str) -> Result<Self> {
        let snapshot: Self = decode(json)?;
        check_version(snapshot.format_version)?;
        if snapshot.entity_type != entity_type {
            return Err(Error::InvalidSnapshot(format!(
                "entity type mismatch: expected '{}', got '{}'",
                entity_type, snapshot.entity_type
            )));
        }
        Ok(snapshot)
    }
}

/// The pending log, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSnapshot {
    pub format_version: u32,
    pub log: PendingLog,
}

impl LogSnapshot {
    pub fn new(log: PendingLog) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            log,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = decode(json)?;
        check_version(snapshot.format_version)?;
        Ok(snapshot)
    }
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
}

fn check_version(format_version: u32) -> Result<()> {
    if format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(Error::InvalidSnapshot(format!(
            "unsupported snapshot format version: {} (max supported: {})",
            format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    Ok(())
}
