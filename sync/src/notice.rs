//! User-visible notices published by a session.

use std::fmt;
use vestry_engine::{EntityType, OperationKind, ReconcileReport};

/// Whether a mutation reached the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The remote accepted the write
    Synced,
    /// The write waits in the pending log
    Queued,
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Saved {
        entity_type: EntityType,
        kind: OperationKind,
        delivery: Delivery,
    },
    LocalSaveFailed(String),
    Reconciled(ReconcileReport),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Saved {
                entity_type,
                kind,
                delivery,
            } => {
                let verb = match kind {
                    OperationKind::Insert => "added",
                    OperationKind::Update => "updated",
                    OperationKind::Delete => "deleted",
                };
                write!(f, "{} {}", entity_label(entity_type), verb)?;
                if *delivery == Delivery::Queued {
                    write!(f, " (offline mode)")?;
                }
                Ok(())
            }
            Notice::LocalSaveFailed(cause) => write!(f, "Failed to save locally: {cause}"),
            Notice::Reconciled(report) => write!(f, "{report}"),
        }
    }
}

/// "members" -> "Member", "prayer_requests" -> "Prayer request".
fn entity_label(entity_type: &str) -> String {
    let singular = entity_type.strip_suffix('s').unwrap_or(entity_type);
    let mut label = singular.replace('_', " ");
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    label
}
