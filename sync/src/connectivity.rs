//! Connectivity state and transition notifications.

use crate::remote::RemoteStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Whether the remote store is believed reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Shared connectivity flag with change notifications.
///
/// Setting the state it already has is not a transition: subscribers are
/// only woken when the state actually flips.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivitySignal {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Report the platform's current state. Returns true on a transition.
    pub fn set(&self, state: Connectivity) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(state = %state, "Connectivity changed");
        }
        changed
    }

    pub fn go_online(&self) -> bool {
        self.set(Connectivity::Online)
    }

    pub fn go_offline(&self) -> bool {
        self.set(Connectivity::Offline)
    }

    /// Receiver that observes every transition from now on.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

/// Ask the remote whether it is reachable.
pub async fn detect(remote: &dyn RemoteStore) -> Connectivity {
    match remote.health_check().await {
        Ok(()) => Connectivity::Online,
        Err(e) => {
            tracing::debug!(error = %e, "Remote health check failed");
            Connectivity::Offline
        }
    }
}

/// Keep `signal` in line with the remote's reachability, forever.
pub async fn probe(remote: Arc<dyn RemoteStore>, signal: ConnectivitySignal, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        signal.set(detect(remote.as_ref()).await);
    }
}
