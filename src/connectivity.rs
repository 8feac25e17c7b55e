// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Online/offline signal.
//!
//! The host feeds platform connectivity events into [`ConnectivityMonitor::set_online`];
//! the fetch orchestrator reads the current value and the hook watches for
//! transitions.

use tokio::sync::watch;
use tracing::info;

use crate::metrics;

#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(online: bool) -> Self {
        metrics::set_online(online);
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Record the platform's current connectivity. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
            metrics::set_online(online);
        }
        changed
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
