// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the resilience hook.

use serde_json::Value;

/// Where the dashboard stands.
///
/// ```text
/// Loading ──network ok──────────► ReadyOnline ◄──online + sync ok──┐
///    │   ──offline + cache hit──► ReadyOfflineCached ◄──offline───┘
///    │   ──fallback data────────► ReadyDegraded
///    └───no data at all─────────► Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Loading,
    ReadyOnline,
    ReadyOfflineCached,
    /// Data is shown, but it did not come fresh from the network
    ReadyDegraded,
    /// Nothing to show
    Error,
}

impl HookStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::ReadyOnline | Self::ReadyOfflineCached | Self::ReadyDegraded)
    }
}

impl std::fmt::Display for HookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::ReadyOnline => write!(f, "ReadyOnline"),
            Self::ReadyOfflineCached => write!(f, "ReadyOfflineCached"),
            Self::ReadyDegraded => write!(f, "ReadyDegraded"),
            Self::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Online,
    Offline,
    Degraded,
}

/// Everything the UI renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct HookState {
    pub status: HookStatus,
    pub data: Option<Value>,
    /// Set only in [`HookStatus::Error`]
    pub error: Option<String>,
    /// Transient message, e.g. a refresh that failed while data was kept
    pub notice: Option<String>,
    pub is_online: bool,
    pub using_offline_data: bool,
    pub performance_degraded: bool,
    pub connection_status: ConnectionStatus,
}

impl HookState {
    pub(crate) fn loading(is_online: bool) -> Self {
        Self {
            status: HookStatus::Loading,
            data: None,
            error: None,
            notice: None,
            is_online,
            using_offline_data: false,
            performance_degraded: false,
            connection_status: if is_online { ConnectionStatus::Online } else { ConnectionStatus::Offline },
        }
    }

    /// Field of the current payload, e.g. `state.field("status")`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }
}

/// What [`submit_mutation`](super::ResilienceHook::submit_mutation) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Written to the cache right away
    Applied,
    /// Offline; queued in the pending-sync slot
    Buffered,
}
