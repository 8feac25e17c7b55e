// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience hook: what the dashboard UI talks to.
//!
//! Composes the fetch orchestrator, the durable cache and the auth chain
//! with the connectivity signal, and publishes a [`HookState`] over a
//! `watch` channel. Stale data is never dropped for a failed refresh; a
//! hard [`HookStatus::Error`] only appears when there is nothing to show.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashboard_resilience::{ConnectivityMonitor, ResilienceConfig, ResilienceHook};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connectivity = Arc::new(ConnectivityMonitor::new(true));
//! let hook = ResilienceHook::build(ResilienceConfig::default(), connectivity.clone()).await?;
//!
//! let state = hook.mount().await;
//! println!("{} (offline data: {})", state.status, state.using_offline_data);
//!
//! // Platform reports the network is gone
//! hook.on_connectivity_change(false).await;
//! # Ok(())
//! # }
//! ```

mod metrics;
mod types;

pub use metrics::HookMetricsSnapshot;
pub use types::{ConnectionStatus, HookState, HookStatus, MutationOutcome};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::AuthFallbackManager;
use crate::cache::{CacheMetricsSnapshot, DurableCache, PendingSyncItem, SetOptions, SyncReport};
use crate::config::{HookConfig, ResilienceConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::fetch::{FetchOptions, FetchOrchestrator, FetchResult, FetchSource, FETCH_CACHE_TAG};
use crate::storage::{InMemoryBackend, StorageBackend, StorageError};
use crate::transport::TransportError;
use metrics::RollingMetrics;

pub struct ResilienceHook {
    config: HookConfig,
    orchestrator: Arc<FetchOrchestrator>,
    cache: Arc<DurableCache>,
    auth: Arc<AuthFallbackManager>,
    connectivity: Arc<ConnectivityMonitor>,
    state: watch::Sender<HookState>,
    rolling: Mutex<RollingMetrics>,
}

impl ResilienceHook {
    pub fn new(
        config: HookConfig,
        orchestrator: Arc<FetchOrchestrator>,
        auth: Arc<AuthFallbackManager>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let (state, _rx) = watch::channel(HookState::loading(connectivity.is_online()));
        Self {
            rolling: Mutex::new(RollingMetrics::new(config.metrics_window)),
            cache: orchestrator.cache().clone(),
            config,
            orchestrator,
            auth,
            connectivity,
            state,
        }
    }

    /// Wire the whole stack over HTTP from one config. Backup credentials
    /// share the cache's active backend.
    pub async fn build(
        config: ResilienceConfig,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Result<Self, TransportError> {
        let cache = Arc::new(DurableCache::new(config.cache));
        cache.init().await;

        let orchestrator = FetchOrchestrator::with_http(cache.clone(), config.fetch)?
            .with_connectivity(connectivity.clone());

        let backend: Arc<dyn StorageBackend> = match cache.storage().await {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "No durable storage for backup credentials, keeping them in memory");
                Arc::new(InMemoryBackend::new())
            }
        };
        let auth = AuthFallbackManager::with_http(config.auth, backend)?;

        Ok(Self::new(config.hook, Arc::new(orchestrator), Arc::new(auth), connectivity))
    }

    #[must_use]
    pub fn state(&self) -> HookState {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HookState> {
        self.state.subscribe()
    }

    pub fn auth(&self) -> &Arc<AuthFallbackManager> {
        &self.auth
    }

    pub fn cache(&self) -> &Arc<DurableCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    /// Response time, cache-hit rate and error rate over the recent window.
    #[must_use]
    pub fn metrics(&self) -> HookMetricsSnapshot {
        self.rolling.lock().snapshot()
    }

    #[must_use]
    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }

    /// Load the primary resource. Offline, the cache is read directly and
    /// the network is not attempted.
    #[tracing::instrument(skip(self), fields(resource = %self.config.resource))]
    pub async fn mount(&self) -> HookState {
        let online = self.connectivity.is_online();
        self.transition(|state| *state = HookState::loading(online));

        if !online {
            match self.cache.get(&self.config.resource).await {
                Ok(Some(data)) => {
                    info!("Offline at mount, showing cached data");
                    self.transition(|state| {
                        state.status = HookStatus::ReadyOfflineCached;
                        state.data = Some(data);
                        state.using_offline_data = true;
                        state.is_online = false;
                        state.connection_status = ConnectionStatus::Offline;
                    });
                    return self.state();
                }
                Ok(None) => debug!("Offline at mount with nothing cached"),
                Err(e) => warn!(error = %e, "Cache read failed at mount"),
            }
        }

        let result = self
            .orchestrator
            .fetch(&self.config.resource, &FetchOptions::default())
            .await;
        self.apply(result);
        self.state()
    }

    /// Re-fetch the primary resource; `force` bypasses the cache.
    pub async fn refresh(&self, force: bool) -> HookState {
        let options = if force { FetchOptions::forced() } else { FetchOptions::default() };
        let result = self.orchestrator.fetch(&self.config.resource, &options).await;
        self.apply(result);
        self.state()
    }

    /// Record a platform connectivity event and react to it. Regaining
    /// connectivity replays buffered mutations, then refreshes.
    pub async fn on_connectivity_change(&self, online: bool) -> HookState {
        self.connectivity.set_online(online);
        self.apply_connectivity(online).await;
        self.state()
    }

    async fn apply_connectivity(&self, online: bool) {
        if !online {
            self.transition(|state| {
                state.is_online = false;
                state.connection_status = ConnectionStatus::Offline;
                if state.status.is_ready() && state.data.is_some() {
                    state.status = HookStatus::ReadyOfflineCached;
                    state.using_offline_data = true;
                }
            });
            return;
        }

        self.transition(|state| state.is_online = true);
        let synced = match self.sync_pending().await {
            Ok(report) if report.is_success() => None,
            Ok(report) => Some(format!("{} offline change(s) could not be synced", report.failed)),
            Err(e) => Some(format!("offline changes could not be read: {}", e)),
        };

        self.refresh(false).await;

        if let Some(notice) = synced {
            warn!(%notice, "Reconnected with unsynced changes");
            self.transition(|state| {
                if state.status == HookStatus::ReadyOnline {
                    state.status = HookStatus::ReadyDegraded;
                    state.connection_status = ConnectionStatus::Degraded;
                }
                state.notice = Some(notice);
            });
        }
    }

    /// Replay every buffered mutation through the cache.
    pub async fn sync_pending(&self) -> Result<SyncReport, StorageError> {
        let items = self.cache.pending_items().await?;
        if items.is_empty() {
            return Ok(SyncReport::default());
        }
        info!(count = items.len(), "Replaying buffered mutations");
        Ok(self.cache.sync(&items).await)
    }

    /// Apply a new payload for the primary resource. Offline, it is
    /// buffered in the pending-sync slot and shown optimistically.
    pub async fn submit_mutation(&self, payload: Value) -> Result<MutationOutcome, StorageError> {
        let resource = self.config.resource.as_str();
        let online = self.connectivity.is_online();

        // Same lifetime and tag as a fetched copy, whether applied now or replayed later
        let options = SetOptions::default()
            .with_ttl(self.orchestrator.config().cache_ttl())
            .with_tag(FETCH_CACHE_TAG);
        let outcome = if online {
            self.cache.set(resource, &payload, options).await?;
            MutationOutcome::Applied
        } else {
            let item = PendingSyncItem::new(resource, payload.clone()).with_options(&options);
            self.cache.queue_pending(&item).await?;
            MutationOutcome::Buffered
        };

        self.transition(|state| {
            state.data = Some(payload);
            if online {
                if !state.status.is_ready() {
                    state.status = HookStatus::ReadyOnline;
                }
            } else {
                state.status = HookStatus::ReadyOfflineCached;
                state.using_offline_data = true;
                state.notice = Some("Saved offline, will sync when back online".into());
            }
            state.error = None;
        });
        Ok(outcome)
    }

    /// Follow the connectivity channel until `shutdown` flips to `true`
    /// (or its sender goes away).
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.connectivity.subscribe();
        info!("Resilience hook running");

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    self.apply_connectivity(online).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Resilience hook stopped");
    }

    fn apply(&self, result: FetchResult) {
        if result.is_skipped() {
            return;
        }
        self.rolling.lock().record(&result);

        let online = self.connectivity.is_online();
        let slow = result.performance.response_time_ms > self.config.slow_response_ms;
        let from_network = result.source == FetchSource::Network;

        self.transition(|state| {
            state.is_online = online;
            match result.payload {
                Some(payload) if result.success => {
                    state.status = if from_network {
                        HookStatus::ReadyOnline
                    } else if !online && result.source == FetchSource::Cache {
                        HookStatus::ReadyOfflineCached
                    } else if result.is_fallback {
                        HookStatus::ReadyDegraded
                    } else {
                        HookStatus::ReadyOnline
                    };
                    state.data = Some(payload);
                    state.error = None;
                    state.notice = None;
                    state.using_offline_data = !online && !from_network;
                    state.performance_degraded = !from_network && slow;
                }
                _ => {
                    let message = result
                        .error
                        .as_ref()
                        .map_or_else(|| "request failed".to_string(), ToString::to_string);
                    if state.status.is_ready() && state.data.is_some() {
                        // Keep what is on screen
                        state.notice = Some(message);
                    } else {
                        state.status = HookStatus::Error;
                        state.data = None;
                        state.error = Some(message);
                    }
                }
            }
            state.connection_status = if !online {
                ConnectionStatus::Offline
            } else if state.performance_degraded || state.status == HookStatus::ReadyDegraded {
                ConnectionStatus::Degraded
            } else {
                ConnectionStatus::Online
            };
        });
    }

    fn transition(&self, update: impl FnOnce(&mut HookState)) {
        let mut moved = None;
        self.state.send_modify(|state| {
            let before = state.status;
            update(state);
            if before != state.status {
                moved = Some((before, state.status));
            }
        });
        if let Some((from, to)) = moved {
            info!(%from, %to, "Hook state transition");
            crate::metrics::record_state_transition(&to.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMethodType, AuthOptions, AuthResponse, AuthTransport, AuthEndpoint, Credentials};
    use crate::config::{AuthConfig, CacheConfig, FetchConfig};
    use crate::fetch::ResourceClient;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves `payload` while `up`, refuses connections otherwise.
    struct SwitchableClient {
        up: AtomicBool,
        payload: Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceClient for SwitchableClient {
        async fn get(&self, _resource: &str) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(self.payload.clone())
            } else {
                Err(TransportError::Network("connection refused".into()))
            }
        }
    }

    struct NoAuth;

    #[async_trait]
    impl AuthTransport for NoAuth {
        async fn post(&self, _endpoint: AuthEndpoint, _body: Value) -> Result<AuthResponse, TransportError> {
            Ok(AuthResponse::rejected("disabled"))
        }
    }

    struct Fixture {
        hook: ResilienceHook,
        client: Arc<SwitchableClient>,
        connectivity: Arc<ConnectivityMonitor>,
    }

    async fn fixture(online: bool, up: bool) -> Fixture {
        let cache = Arc::new(DurableCache::new(CacheConfig::default()));
        cache.init().await;
        let client = Arc::new(SwitchableClient {
            up: AtomicBool::new(up),
            payload: json!({"id": "sub_123", "status": "active"}),
            calls: AtomicUsize::new(0),
        });
        let connectivity = Arc::new(ConnectivityMonitor::new(online));
        let fetch_config = FetchConfig { initial_backoff_ms: 1, max_backoff_ms: 2, ..Default::default() };
        let orchestrator = FetchOrchestrator::new(cache, client.clone(), fetch_config)
            .with_connectivity(connectivity.clone());
        let auth = AuthFallbackManager::new(AuthConfig::default(), Arc::new(NoAuth), Arc::new(InMemoryBackend::new()));
        let hook = ResilienceHook::new(HookConfig::default(), Arc::new(orchestrator), Arc::new(auth), connectivity.clone());
        Fixture { hook, client, connectivity }
    }

    #[tokio::test]
    async fn test_mount_online() {
        let f = fixture(true, true).await;
        let state = f.hook.mount().await;
        assert_eq!(state.status, HookStatus::ReadyOnline);
        assert_eq!(state.field("status"), Some(&json!("active")));
        assert_eq!(state.connection_status, ConnectionStatus::Online);
        assert_eq!(f.hook.metrics().samples, 1);
    }

    #[tokio::test]
    async fn test_mount_offline_with_cache() {
        let f = fixture(false, false).await;
        f.hook
            .cache()
            .set("/api/subscription", &json!({"id": "sub_123", "status": "active"}), SetOptions::default())
            .await
            .unwrap();

        let state = f.hook.mount().await;
        assert_eq!(state.status, HookStatus::ReadyOfflineCached);
        assert_eq!(state.field("status"), Some(&json!("active")));
        assert!(!state.is_online);
        assert!(state.using_offline_data);
        assert_eq!(f.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mount_with_nothing_is_error() {
        let f = fixture(true, false).await;
        let state = f.hook.mount().await;
        assert_eq!(state.status, HookStatus::Error);
        assert!(state.error.is_some());
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_failed_forced_refresh_keeps_data() {
        let f = fixture(true, true).await;
        f.hook.mount().await;
        f.hook.cache().clear().await.unwrap();
        f.client.up.store(false, Ordering::SeqCst);

        let state = f.hook.refresh(true).await;
        assert_eq!(state.status, HookStatus::ReadyOnline);
        assert_eq!(state.field("id"), Some(&json!("sub_123")));
        assert!(state.notice.is_some());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_offline_then_online_replays_mutation() {
        let f = fixture(true, true).await;
        f.hook.mount().await;

        let state = f.hook.on_connectivity_change(false).await;
        assert_eq!(state.status, HookStatus::ReadyOfflineCached);
        assert!(!f.connectivity.is_online());

        let outcome = f.hook.submit_mutation(json!({"id": "sub_123", "status": "paused"})).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Buffered);
        assert_eq!(f.hook.cache().pending_items().await.unwrap().len(), 1);

        let state = f.hook.on_connectivity_change(true).await;
        assert_eq!(state.status, HookStatus::ReadyOnline);
        assert_eq!(state.field("status"), Some(&json!("paused")));
        assert!(f.hook.cache().pending_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_mutation_keeps_fetch_lifetime() {
        let f = fixture(false, true).await;
        f.hook.submit_mutation(json!({"id": "sub_123", "status": "paused"})).await.unwrap();
        f.hook.on_connectivity_change(true).await;

        let entry = f.hook.cache().peek("/api/subscription").await.unwrap().unwrap();
        let fetch_ttl = f.hook.orchestrator().config().cache_ttl();
        assert_eq!((entry.expires_at - entry.stored_at) as u128, fetch_ttl.as_millis());
        assert!(entry.has_tag(FETCH_CACHE_TAG));
    }

    #[tokio::test]
    async fn test_state_is_published() {
        let f = fixture(true, true).await;
        let mut rx = f.hook.subscribe();
        f.hook.mount().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, HookStatus::ReadyOnline);
    }

    #[tokio::test]
    async fn test_run_follows_connectivity_until_shutdown() {
        let f = Arc::new(fixture(true, true).await);
        f.hook.mount().await;
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let f = f.clone();
            tokio::spawn(async move { f.hook.run(stop_rx).await })
        };
        // Let the loop subscribe before the first transition
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut states = f.hook.subscribe();
        f.connectivity.set_online(false);
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                states.changed().await.unwrap();
                if states.borrow_and_update().status == HookStatus::ReadyOfflineCached {
                    break;
                }
            }
        })
        .await
        .unwrap();

        stop_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_is_reachable() {
        let f = fixture(true, true).await;
        let outcome = f
            .hook
            .auth()
            .authenticate(AuthMethodType::Token, &Credentials::token("t"), &AuthOptions::default())
            .await;
        assert!(!outcome.success);
    }
}
