//! Connectivity tracking.
//!
//! The engine does not probe the network itself: the host application
//! reports transitions (browser events, OS callbacks, a failed request)
//! and the engine reacts. State is fanned out over a watch channel so
//! the driver task and any number of observers see every transition.

use std::fmt;
use tokio::sync::watch;

/// Reported network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// The server is believed reachable.
    #[default]
    Online,
    /// The server is believed unreachable.
    Offline,
}

impl ConnectivityState {
    /// True when online.
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
        }
    }
}

/// Owner side of the connectivity channel.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the given initial state.
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Reports a state transition. Redundant reports are dropped so
    /// observers only wake on a real change.
    pub fn set(&self, state: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::info!(%state, "connectivity changed");
                *current = state;
                true
            }
        });
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// True when currently online.
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Subscribes an observer to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}
