//! Watch-channel network monitor.
//!
//! The embedding platform (the mobile shell, a connectivity probe, a test)
//! pushes transitions in via [`WatchNetworkMonitor::set_state`]; the sync
//! coordinator observes them through the `NetworkMonitor` seam.

use tokio::sync::watch;

use solace_core::sync::{NetworkMonitor, NetworkState};

/// Connectivity source fed by the embedding platform.
pub struct WatchNetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl WatchNetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Publishes a connectivity transition. Repeating the current state is
    /// harmless; watchers only wake on change.
    pub fn set_state(&self, state: NetworkState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_wakes_watchers() {
        let monitor = WatchNetworkMonitor::new(NetworkState::Offline);
        let mut rx = monitor.watch();

        monitor.set_state(NetworkState::Online);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), NetworkState::Online);
        assert_eq!(monitor.current(), NetworkState::Online);
    }

    #[tokio::test]
    async fn test_repeated_state_does_not_wake() {
        let monitor = WatchNetworkMonitor::new(NetworkState::Online);
        let mut rx = monitor.watch();
        rx.mark_unchanged();

        monitor.set_state(NetworkState::Online);

        assert!(!rx.has_changed().unwrap());
    }
}
