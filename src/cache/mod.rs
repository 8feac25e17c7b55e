// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable key/value cache with TTL expiry.
//!
//! The [`DurableCache`] sits on two [`StorageBackend`]s:
//! - **Primary**: structured store (SQLite), selected when its probe succeeds
//! - **Fallback**: simple key/value store, used when the primary is unusable
//!   and for any single operation that faults on the primary
//!
//! Only total unavailability reaches the caller, as
//! [`StorageError::Unavailable`] or [`StorageError::QuotaExceeded`].
//!
//! # Write-back
//!
//! A write or delete that faults on an otherwise active primary lands on the
//! fallback and the key is remembered. Until the primary accepts it again,
//! reads and listings for that key are answered from the fallback. The first
//! operation after the primary recovers copies the fallback state back and
//! drops the fallback copy. Fallback records found at startup are treated
//! the same way, since they were written while the primary was unusable.
//!
//! # Read contract
//!
//! [`get`](DurableCache::get) is not a pure read: an entry found expired (or
//! unreadable) is deleted before `None` is returned. Use
//! [`peek`](DurableCache::peek) for inspection without side effects.
//!
//! # Namespacing
//!
//! ```text
//! {prefix}{key}                    primary entries (CacheEntry JSON)
//! {prefix}pending_sync_{resource}  buffered offline mutations (PendingSyncItem JSON)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use dashboard_resilience::{DurableCache, SetOptions};
//! use dashboard_resilience::config::CacheConfig;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = DurableCache::new(CacheConfig {
//!     sql_url: Some("sqlite://dashboard_cache.db?mode=rwc".into()),
//!     fallback_path: Some("./dashboard_cache.json".into()),
//!     ..Default::default()
//! });
//! cache.init().await;
//!
//! let opts = SetOptions::default().with_ttl(Duration::from_secs(300)).with_tag("subscription");
//! cache.set("/api/subscription", &json!({"id": "sub_123"}), opts).await?;
//! assert!(cache.get("/api/subscription").await?.is_some());
//! # Ok(())
//! # }
//! ```

mod stats;
mod types;

pub use stats::CacheMetricsSnapshot;
pub use types::{
    CacheChange, CacheEntry, ChangeOp, PendingSyncItem, SetOptions, StorageUsage, SyncFailure,
    SyncReport, PENDING_SYNC_PREFIX,
};

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::metrics::LatencyTimer;
use crate::storage::{FileBackend, InMemoryBackend, SqlBackend, StorageBackend, StorageError};
use stats::CacheStats;
use types::pending_slot;
pub(crate) use types::now_millis;

/// Which backends passed their probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Availability {
    primary: bool,
    fallback: bool,
}

/// Newest state of a key the active primary has not accepted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Standby {
    /// Current value lives on the fallback only
    Written,
    /// Deleted on the fallback; the primary may still hold an older row
    Deleted,
}

type KeyLocks = DashMap<String, Arc<Mutex<()>>>;

/// Write lock for one key. The table entry is dropped with the last holder.
struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone, so a count of one means nobody else wants it
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct DurableCache {
    config: CacheConfig,
    primary: Option<Arc<dyn StorageBackend>>,
    fallback: Arc<dyn StorageBackend>,
    availability: OnceCell<Availability>,
    /// Per-key write serialization (last write wins)
    key_locks: KeyLocks,
    /// Full keys whose newest state the primary missed
    standby: DashMap<String, Standby>,
    /// A namespace clear the primary missed; applied before any write-back
    pending_clear: AtomicBool,
    stats: CacheStats,
    changes: broadcast::Sender<CacheChange>,
}

impl DurableCache {
    /// Build the backends described by `config`: SQLite primary when
    /// `sql_url` is set, file fallback when `fallback_path` is set
    /// (volatile memory otherwise).
    pub fn new(config: CacheConfig) -> Self {
        let primary = config
            .sql_url
            .as_ref()
            .map(|url| Arc::new(SqlBackend::new(url.clone())) as Arc<dyn StorageBackend>);
        let fallback: Arc<dyn StorageBackend> = match &config.fallback_path {
            Some(path) => Arc::new(FileBackend::new(path, config.fallback_max_bytes)),
            None => Arc::new(InMemoryBackend::with_capacity_bytes(config.fallback_max_bytes)),
        };
        Self::with_backends(config, primary, fallback)
    }

    pub fn with_backends(
        config: CacheConfig,
        primary: Option<Arc<dyn StorageBackend>>,
        fallback: Arc<dyn StorageBackend>,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.change_channel_capacity.max(1));
        Self {
            config,
            primary,
            fallback,
            availability: OnceCell::new(),
            key_locks: DashMap::new(),
            standby: DashMap::new(),
            pending_clear: AtomicBool::new(false),
            stats: CacheStats::default(),
            changes,
        }
    }

    /// Probe the backends and select the active one.
    ///
    /// Never fails: returns the active backend name, or `None` when neither
    /// backend is usable (every later operation then fails with
    /// [`StorageError::Unavailable`]). Repeated calls return the first result.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> Option<&'static str> {
        self.availability.get_or_init(|| self.probe()).await;
        self.active_backend()
    }

    async fn probe(&self) -> Availability {
        let primary = match &self.primary {
            Some(primary) => match primary.init().await {
                Ok(()) => {
                    info!(backend = primary.name(), "Primary cache backend ready");
                    true
                }
                Err(e) => {
                    warn!(backend = primary.name(), error = %e, "Primary cache backend unusable, degrading to fallback");
                    crate::metrics::record_error("cache", "init", e.label());
                    false
                }
            },
            None => false,
        };

        let fallback = match self.fallback.init().await {
            Ok(()) => {
                debug!(backend = self.fallback.name(), "Fallback cache backend ready");
                true
            }
            Err(e) => {
                warn!(backend = self.fallback.name(), error = %e, "Fallback cache backend unusable");
                crate::metrics::record_error("cache", "init", e.label());
                false
            }
        };

        if !primary && !fallback {
            warn!("No usable cache backend, operations will fail");
        }
        if primary && fallback {
            self.adopt_fallback_records().await;
        }
        Availability { primary, fallback }
    }

    /// Fallback records present at startup were written while the primary
    /// was unusable, so they are newer than anything the primary holds.
    async fn adopt_fallback_records(&self) {
        match self.fallback.list(&self.config.key_prefix).await {
            Ok(keys) => {
                if !keys.is_empty() {
                    info!(count = keys.len(), "Fallback holds records the primary missed, queued for write-back");
                }
                for key in keys {
                    self.standby.insert(key, Standby::Written);
                }
            }
            Err(e) => warn!(error = %e, "Could not list fallback records for write-back"),
        }
    }

    async fn ready(&self) -> Result<Availability, StorageError> {
        let avail = *self.availability.get_or_init(|| self.probe()).await;
        if avail.primary || avail.fallback {
            Ok(avail)
        } else {
            Err(StorageError::Unavailable("no usable cache backend".into()))
        }
    }

    /// Primary active with the fallback standing by.
    fn standing_in(&self) -> bool {
        self.availability.get().is_some_and(|a| a.primary && a.fallback)
    }

    /// Backend currently serving operations.
    #[must_use]
    pub fn active_backend(&self) -> Option<&'static str> {
        let avail = self.availability.get()?;
        if avail.primary {
            self.primary.as_ref().map(|p| p.name())
        } else if avail.fallback {
            Some(self.fallback.name())
        } else {
            None
        }
    }

    /// The backend serving operations, for stores that persist alongside
    /// the cache under their own key prefix.
    pub async fn storage(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let avail = self.ready().await?;
        match &self.primary {
            Some(primary) if avail.primary => Ok(primary.clone()),
            _ => Ok(self.fallback.clone()),
        }
    }

    /// Full storage key for a cache key.
    #[must_use]
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn pending_prefix(&self) -> String {
        self.namespaced_key(PENDING_SYNC_PREFIX)
    }

    /// Run `f` on the active backend, retrying once on the fallback when the
    /// primary faults. The flag tells whether the primary served the call.
    async fn route_tracked<'a, T, F, Fut>(&'a self, operation: &'static str, f: F) -> Result<(T, bool), StorageError>
    where
        F: Fn(&'a dyn StorageBackend) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let avail = self.ready().await?;
        let mut primary_err = None;

        if avail.primary {
            if let Some(primary) = self.primary.as_deref() {
                match f(primary).await {
                    Ok(v) => return Ok((v, true)),
                    Err(e) if e.is_backend_fault() && avail.fallback => {
                        warn!(
                            backend = primary.name(),
                            operation,
                            error = %e,
                            "Primary backend fault, retrying on fallback"
                        );
                        crate::metrics::record_backend_failover(primary.name(), self.fallback.name());
                        primary_err = Some(e);
                    }
                    Err(e) => return Err(surface(None, e)),
                }
            }
        }

        f(self.fallback.as_ref())
            .await
            .map(|v| (v, false))
            .map_err(|e| surface(primary_err, e))
    }

    async fn route<'a, T, F, Fut>(&'a self, operation: &'static str, f: F) -> Result<T, StorageError>
    where
        F: Fn(&'a dyn StorageBackend) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.route_tracked(operation, f).await.map(|(v, _)| v)
    }

    /// Current record for `full_key`, honouring state the primary missed.
    async fn read_raw(&self, full_key: &str) -> Result<Option<String>, StorageError> {
        self.ready().await?;
        let standby = self.standby.get(full_key).map(|s| *s);
        match standby {
            Some(Standby::Written) => self.fallback.get(full_key).await.map_err(|e| surface(None, e)),
            Some(Standby::Deleted) => Ok(None),
            None if self.pending_clear.load(Ordering::Acquire) => Ok(None),
            None => self.route("get", |b| b.get(full_key)).await,
        }
    }

    async fn write_raw(&self, full_key: &str, raw: &str) -> Result<(), StorageError> {
        self.ready().await?;
        if self.pending_clear.load(Ordering::Acquire) {
            // Must not reach the primary before the deferred clear does
            self.fallback.set(full_key, raw).await.map_err(|e| surface(None, e))?;
            self.standby.insert(full_key.to_string(), Standby::Written);
            return Ok(());
        }
        let ((), on_primary) = self.route_tracked("set", |b| b.set(full_key, raw)).await?;
        self.settle_standby(full_key, on_primary, Standby::Written).await;
        Ok(())
    }

    async fn delete_raw(&self, full_key: &str) -> Result<(), StorageError> {
        self.ready().await?;
        if self.pending_clear.load(Ordering::Acquire) {
            self.fallback.delete(full_key).await.map_err(|e| surface(None, e))?;
            self.standby.insert(full_key.to_string(), Standby::Deleted);
            return Ok(());
        }
        let ((), on_primary) = self.route_tracked("delete", |b| b.delete(full_key)).await?;
        self.settle_standby(full_key, on_primary, Standby::Deleted).await;
        Ok(())
    }

    /// Record where the newest state of `full_key` lives after a write.
    async fn settle_standby(&self, full_key: &str, on_primary: bool, state: Standby) {
        if !self.standing_in() {
            return;
        }
        if !on_primary {
            warn!(key = full_key, "Primary missed a write, holding it on fallback until write-back");
            self.standby.insert(full_key.to_string(), state);
            return;
        }
        // The primary now holds the newest state; any fallback copy is stale
        let was_standby = self.standby.remove(full_key).is_some();
        if was_standby || state == Standby::Deleted {
            if let Err(e) = self.fallback.delete(full_key).await {
                debug!(error = %e, "Standby delete failed");
            }
        }
    }

    /// Copy state the primary missed back to it, then drop the fallback
    /// copies. Stops at the first fault; the rest wait for a later call.
    /// Callers must not hold a key lock.
    async fn recover(&self) {
        if self.ready().await.is_err() {
            return;
        }
        if self.standby.is_empty() && !self.pending_clear.load(Ordering::Acquire) {
            return;
        }
        if !self.standing_in() {
            return;
        }
        let Some(primary) = self.primary.as_deref() else {
            return;
        };

        if self.pending_clear.load(Ordering::Acquire) {
            match primary.clear(&self.config.key_prefix).await {
                Ok(removed) => {
                    self.pending_clear.store(false, Ordering::Release);
                    info!(removed, "Deferred clear applied to primary");
                }
                Err(e) => {
                    debug!(error = %e, "Primary still failing, write-back deferred");
                    return;
                }
            }
        }

        let keys: Vec<String> = self.standby.iter().map(|e| e.key().clone()).collect();
        let mut restored = 0;
        for full in keys {
            let _guard = self.lock_key(&full).await;
            let Some(state) = self.standby.get(&full).map(|s| *s) else {
                continue;
            };
            let written_back = match state {
                Standby::Written => match self.fallback.get(&full).await {
                    Ok(Some(raw)) => primary.set(&full, &raw).await,
                    Ok(None) => primary.delete(&full).await,
                    Err(e) => {
                        debug!(key = %full, error = %e, "Fallback copy unreadable, write-back deferred");
                        break;
                    }
                },
                Standby::Deleted => primary.delete(&full).await,
            };
            if let Err(e) = written_back {
                debug!(key = %full, error = %e, "Primary still failing, write-back deferred");
                break;
            }
            if let Err(e) = self.fallback.delete(&full).await {
                debug!(key = %full, error = %e, "Could not drop written-back fallback copy");
            }
            self.standby.remove(&full);
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "Fallback state written back to primary");
            crate::metrics::record_write_back(restored);
        }
    }

    /// Full keys under `prefix`, with state the primary missed merged in.
    async fn list_raw(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ready().await?;
        let listed = if self.pending_clear.load(Ordering::Acquire) {
            Vec::new()
        } else {
            self.route("list", |b| b.list(prefix)).await?
        };

        let mut keys: BTreeSet<String> = listed.into_iter().collect();
        for entry in self.standby.iter().filter(|e| e.key().starts_with(prefix)) {
            match entry.value() {
                Standby::Written => {
                    keys.insert(entry.key().clone());
                }
                Standby::Deleted => {
                    keys.remove(entry.key());
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn instrumented<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        let timer = LatencyTimer::new(self.active_backend().unwrap_or("none"), operation);
        let result = fut.await;

        self.stats.record(result.is_ok(), timer.elapsed());
        let backend = self.active_backend().unwrap_or("none");
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation(backend, operation, status);
        if let Err(e) = &result {
            crate::metrics::record_error("cache", operation, e.label());
        }
        result
    }

    async fn lock_key(&self, full_key: &str) -> KeyGuard<'_> {
        let lock = self.key_locks.entry(full_key.to_string()).or_default().clone();
        KeyGuard {
            locks: &self.key_locks,
            key: full_key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn notify(&self, key: &str, op: ChangeOp) {
        // No receivers is fine
        let _ = self.changes.send(CacheChange { key: key.to_string(), op });
    }

    /// Delete `full_key` only if it still holds `raw`, so a concurrent
    /// overwrite is never lost to a lazy eviction.
    async fn evict_if_unchanged(&self, key: &str, full_key: &str, raw: &str) -> Result<bool, StorageError> {
        let _guard = self.lock_key(full_key).await;
        let current = self.read_raw(full_key).await?;
        if current.as_deref() != Some(raw) {
            return Ok(false);
        }
        self.delete_raw(full_key).await?;
        self.notify(key, ChangeOp::Delete);
        Ok(true)
    }

    /// Read an entry, purging it when expired or unreadable.
    async fn read_live(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        self.recover().await;
        let full = self.namespaced_key(key);
        let Some(raw) = self.read_raw(&full).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired() => Ok(Some(entry)),
            Ok(entry) => {
                if self.evict_if_unchanged(key, &full, &raw).await? {
                    debug!(key, expired_at = entry.expires_at, "Purged expired cache entry");
                    self.stats.record_expired(1);
                    crate::metrics::record_expired(1);
                }
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cache record");
                self.evict_if_unchanged(key, &full, &raw).await?;
                Ok(None)
            }
        }
    }

    /// Payload for `key` if present and unexpired. Expired entries are
    /// deleted as a side effect.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.instrumented("get", async {
            let entry = self.read_live(key).await?;
            self.stats.record_lookup(entry.is_some());
            Ok(entry.map(|e| e.payload))
        })
        .await
    }

    /// Typed variant of [`get`](Self::get).
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Serialization { key: key.to_string(), reason: e.to_string() }),
            None => Ok(None),
        }
    }

    /// Stored entry for `key`, expired or not, without purging anything.
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let full = self.namespaced_key(key);
        let raw = self.read_raw(&full).await?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| StorageError::Serialization { key: key.to_string(), reason: e.to_string() })
        })
        .transpose()
    }

    /// Store `payload` under `key`, replacing any previous entry.
    ///
    /// The payload must serialize to JSON, otherwise
    /// [`StorageError::Validation`] is returned and nothing is written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &T,
        options: SetOptions,
    ) -> Result<(), StorageError> {
        self.instrumented("set", async {
            if key.is_empty() {
                return Err(StorageError::Validation("cache key must not be empty".into()));
            }
            let value = serde_json::to_value(payload)
                .map_err(|e| StorageError::Validation(format!("payload for '{}' is not serializable: {}", key, e)))?;

            let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
            let entry = CacheEntry::new(key, value, ttl, options.tags);
            let raw = serde_json::to_string(&entry)
                .map_err(|e| StorageError::Validation(e.to_string()))?;

            self.recover().await;
            let full = self.namespaced_key(key);
            let _guard = self.lock_key(&full).await;
            self.write_raw(&full, &raw).await?;
            self.notify(key, ChangeOp::Put);
            debug!(key, expires_at = entry.expires_at, "Cache entry stored");
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.instrumented("delete", async {
            self.recover().await;
            let full = self.namespaced_key(key);
            let _guard = self.lock_key(&full).await;
            self.delete_raw(&full).await?;
            self.notify(key, ChangeOp::Delete);
            Ok(())
        })
        .await
    }

    /// Remove every entry in this cache's namespace (pending mutations
    /// included). Data outside the namespace is untouched.
    pub async fn clear(&self) -> Result<u64, StorageError> {
        self.instrumented("clear", async {
            self.recover().await;
            let prefix = self.config.key_prefix.as_str();
            let (removed, on_primary) = self.route_tracked("clear", |b| b.clear(prefix)).await?;

            if self.standing_in() {
                if !on_primary {
                    warn!("Primary missed a clear, deferring it until the primary recovers");
                    self.pending_clear.store(true, Ordering::Release);
                    self.standby.clear();
                } else {
                    match self.fallback.clear(prefix).await {
                        Ok(_) => self.standby.clear(),
                        Err(e) => {
                            // Copies left behind must not be written back over the clear
                            debug!(error = %e, "Standby clear failed");
                            self.standby.alter_all(|_, _| Standby::Deleted);
                        }
                    }
                }
            }

            self.notify("", ChangeOp::Clear);
            info!(removed, "Cache namespace cleared");
            Ok(removed)
        })
        .await
    }

    /// Purge every expired entry. Returns the number purged.
    pub async fn cleanup(&self) -> Result<usize, StorageError> {
        self.instrumented("cleanup", async {
            let now = types::now_millis();
            let mut purged = 0;

            for key in self.keys().await? {
                let full = self.namespaced_key(&key);
                let Some(raw) = self.read_raw(&full).await? else {
                    continue;
                };
                let stale = match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => entry.is_expired_at(now),
                    Err(_) => true,
                };
                if stale && self.evict_if_unchanged(&key, &full, &raw).await? {
                    purged += 1;
                }
            }

            if purged > 0 {
                self.stats.record_expired(purged as u64);
                crate::metrics::record_expired(purged);
                info!(purged, "Cache cleanup purged expired entries");
            }
            Ok(purged)
        })
        .await
    }

    /// Cache keys (namespace prefix stripped), pending mutations excluded.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.recover().await;
        let prefix = self.config.key_prefix.as_str();
        let keys = self.list_raw(prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
            .filter(|k| !k.starts_with(PENDING_SYNC_PREFIX))
            .collect())
    }

    /// Live entries carrying `tag`, as `(key, payload)` pairs.
    pub async fn get_by_tag(&self, tag: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let mut matches = Vec::new();
        for key in self.keys().await? {
            if let Some(entry) = self.read_live(&key).await? {
                if entry.has_tag(tag) {
                    matches.push((key, entry.payload));
                }
            }
        }
        Ok(matches)
    }

    /// Buffer a mutation in its pending-sync slot, replacing an older one
    /// for the same key.
    pub async fn queue_pending(&self, item: &PendingSyncItem) -> Result<(), StorageError> {
        self.instrumented("queue_pending", async {
            let raw = serde_json::to_string(item)
                .map_err(|e| StorageError::Validation(e.to_string()))?;
            self.recover().await;
            let full = self.namespaced_key(&item.slot());
            let _guard = self.lock_key(&full).await;
            self.write_raw(&full, &raw).await?;
            debug!(key = %item.key, "Mutation buffered for sync");
            Ok(())
        })
        .await
    }

    /// Every buffered mutation, oldest first.
    pub async fn pending_items(&self) -> Result<Vec<PendingSyncItem>, StorageError> {
        self.recover().await;
        let prefix = self.pending_prefix();
        let slots = self.list_raw(&prefix).await?;

        let mut items = Vec::with_capacity(slots.len());
        for slot in slots {
            let Some(raw) = self.read_raw(&slot).await? else {
                continue;
            };
            match serde_json::from_str::<PendingSyncItem>(&raw) {
                Ok(item) => items.push(item),
                Err(e) => warn!(slot = %slot, error = %e, "Skipping unreadable pending mutation"),
            }
        }
        items.sort_by_key(|i| i.captured_at);
        Ok(items)
    }

    pub async fn clear_pending(&self, key: &str) -> Result<(), StorageError> {
        self.recover().await;
        let full = self.namespaced_key(&pending_slot(key));
        let _guard = self.lock_key(&full).await;
        self.delete_raw(&full).await
    }

    /// Drop the pending slot for `item` unless a newer mutation replaced it.
    async fn settle_pending(&self, item: &PendingSyncItem) -> Result<(), StorageError> {
        let full = self.namespaced_key(&item.slot());
        let _guard = self.lock_key(&full).await;
        let Some(raw) = self.read_raw(&full).await? else {
            return Ok(());
        };
        let newer = serde_json::from_str::<PendingSyncItem>(&raw)
            .map(|queued| queued.captured_at > item.captured_at)
            .unwrap_or(false);
        if !newer {
            self.delete_raw(&full).await?;
        }
        Ok(())
    }

    /// Replay buffered mutations with the TTL and tags each was queued
    /// with. Each item is written independently: one failure never aborts
    /// the batch. Replayed items leave the pending queue.
    pub async fn sync(&self, items: &[PendingSyncItem]) -> SyncReport {
        let mut report = SyncReport::default();

        for item in items {
            match self.set(&item.key, &item.payload, item.set_options()).await {
                Ok(()) => {
                    report.successful += 1;
                    if let Err(e) = self.settle_pending(item).await {
                        warn!(key = %item.key, error = %e, "Replayed mutation left in pending queue");
                    }
                }
                Err(error) => {
                    warn!(key = %item.key, error = %error, "Pending mutation replay failed");
                    report.failed += 1;
                    report.errors.push(SyncFailure { key: item.key.clone(), error });
                }
            }
        }

        crate::metrics::record_sync(report.successful, report.failed);
        info!(successful = report.successful, failed = report.failed, "Pending sync complete");
        report
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.stats.snapshot(self.active_backend())
    }

    /// Approximate item count and byte size of the namespace.
    pub async fn storage_usage(&self) -> Result<StorageUsage, StorageError> {
        self.recover().await;
        let prefix = self.config.key_prefix.as_str();
        let keys = self.list_raw(prefix).await?;

        let mut bytes = 0;
        for key in &keys {
            if let Some(raw) = self.read_raw(key).await? {
                bytes += key.len() + raw.len();
            }
        }

        crate::metrics::set_cache_usage(keys.len(), bytes);
        Ok(StorageUsage {
            item_count: keys.len(),
            approximate_bytes: bytes,
            backend: self.active_backend(),
        })
    }

    /// Receive committed changes (best effort, see [`CacheChange`]).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Error reported once every usable backend has failed.
fn surface(primary: Option<StorageError>, last: StorageError) -> StorageError {
    match (primary, last) {
        (_, e @ StorageError::QuotaExceeded { .. }) => e,
        (Some(e @ StorageError::QuotaExceeded { .. }), _) => e,
        (_, StorageError::Backend(msg)) => StorageError::Unavailable(msg),
        (_, e) => e,
    }
}
