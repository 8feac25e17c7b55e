// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Records persisted by the durable cache and the values its operations return.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::StorageError;

/// Key prefix (after the cache namespace) of the pending-sync queue.
pub const PENDING_SYNC_PREFIX: &str = "pending_sync_";

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A cached payload with its expiry window.
///
/// # Example
///
/// ```
/// use dashboard_resilience::CacheEntry;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let entry = CacheEntry::new(
///     "/api/subscription",
///     json!({"id": "sub_123", "status": "active"}),
///     Duration::from_secs(300),
///     vec!["subscription".into()],
/// );
///
/// assert!(entry.expires_at >= entry.stored_at);
/// assert!(!entry.is_expired());
/// assert!(entry.has_tag("subscription"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    /// Epoch millis of the write
    pub stored_at: i64,
    /// Epoch millis at which the entry stops being served
    pub expires_at: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Value, ttl: Duration, tags: Vec<String>) -> Self {
        let stored_at = now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            key: key.into(),
            payload,
            stored_at,
            expires_at: stored_at.saturating_add(ttl_ms),
            tags,
        }
    }

    /// Expired once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A mutation captured while offline, waiting to be replayed by `sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSyncItem {
    /// Cache key the mutation applies to
    pub key: String,
    pub payload: Value,
    /// Epoch millis of capture
    pub captured_at: i64,
    /// TTL of the replayed entry; the cache default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl PendingSyncItem {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
            captured_at: now_millis(),
            ttl_ms: None,
            tags: Vec::new(),
        }
    }

    /// Replay with the same TTL and tags an online write would have used.
    #[must_use]
    pub fn with_options(mut self, options: &SetOptions) -> Self {
        self.ttl_ms = options.ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self.tags = options.tags.clone();
        self
    }

    /// Options `sync` writes this item with.
    #[must_use]
    pub fn set_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl_ms.map(Duration::from_millis),
            tags: self.tags.clone(),
        }
    }

    /// Storage slot (relative to the cache namespace) holding this item.
    #[must_use]
    pub fn slot(&self) -> String {
        pending_slot(&self.key)
    }
}

pub(crate) fn pending_slot(key: &str) -> String {
    format!("{PENDING_SYNC_PREFIX}{key}")
}

/// Per-write options for [`DurableCache::set`](super::DurableCache::set).
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Falls back to the configured default TTL
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A single replay that failed during `sync`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub key: String,
    pub error: StorageError,
}

/// Result of replaying a batch of pending mutations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncReport {
    /// Check if every item replayed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Kind of committed change announced to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Put,
    Delete,
    Clear,
}

/// Change notification emitted after a write commits.
///
/// Delivery is best effort: a lagging receiver loses events and should
/// re-read the keys it cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    /// Cache key without namespace prefix (empty for `Clear`)
    pub key: String,
    pub op: ChangeOp,
}

/// Approximate footprint of the cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub item_count: usize,
    pub approximate_bytes: usize,
    pub backend: Option<&'static str>,
}
