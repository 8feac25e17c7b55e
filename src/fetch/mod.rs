// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilient fetch orchestrator.
//!
//! Composes a [`ResourceClient`] with the [`DurableCache`]:
//!
//! 1. **Cache first**: a valid entry is served without touching the network
//!    (unless `force_refresh` or `!use_cache`)
//! 2. **Network with retry**: bounded attempts, exponential backoff, a
//!    per-attempt timeout; successes are cached for `cache_ttl`
//! 3. **Fallback**: cached value, then static payload, then a terminal error
//!
//! Low-priority requests are dropped while offline without consuming retry
//! budget or touching metrics. Normal requests made while offline skip step 2.
//!
//! Superseding calls for the same resource race independently; the caller
//! keeps whichever result it applies last.

mod client;
mod types;

pub use client::{HttpResourceClient, ResourceClient};
pub use types::{FetchError, FetchOptions, FetchPerformance, FetchPriority, FetchResult, FetchSource};

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{DurableCache, SetOptions};
use crate::config::FetchConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::metrics;
use crate::resilience::retry::{retry_while, RetryConfig};
use crate::transport::TransportError;

/// Tag attached to every response the orchestrator caches.
pub const FETCH_CACHE_TAG: &str = "fetch";

pub struct FetchOrchestrator {
    cache: Arc<DurableCache>,
    client: Arc<dyn ResourceClient>,
    config: FetchConfig,
    retry: RetryConfig,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    fallbacks: DashMap<String, Value>,
}

impl FetchOrchestrator {
    pub fn new(cache: Arc<DurableCache>, client: Arc<dyn ResourceClient>, config: FetchConfig) -> Self {
        let retry = RetryConfig::from_fetch_config(&config);
        Self {
            cache,
            client,
            config,
            retry,
            connectivity: None,
            fallbacks: DashMap::new(),
        }
    }

    /// Orchestrator over [`HttpResourceClient`].
    pub fn with_http(cache: Arc<DurableCache>, config: FetchConfig) -> Result<Self, TransportError> {
        let client = HttpResourceClient::new(&config)?;
        Ok(Self::new(cache, Arc::new(client), config))
    }

    /// Consult `monitor` before going to the network. Without one the
    /// orchestrator assumes it is online.
    #[must_use]
    pub fn with_connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Static payload served for `resource` when nothing better exists.
    /// A per-call [`FetchOptions::fallback`] takes precedence.
    pub fn register_fallback(&self, resource: impl Into<String>, payload: Value) {
        self.fallbacks.insert(resource.into(), payload);
    }

    pub fn cache(&self) -> &Arc<DurableCache> {
        &self.cache
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.as_ref().map_or(true, |c| c.is_online())
    }

    #[tracing::instrument(skip(self, options), fields(priority = ?options.priority))]
    pub async fn fetch(&self, resource: &str, options: &FetchOptions) -> FetchResult {
        let start = Instant::now();
        let online = self.is_online();

        if options.priority == FetchPriority::Low && !online {
            debug!("Skipping low-priority request while offline");
            return FetchResult {
                success: false,
                payload: None,
                source: FetchSource::Network,
                is_fallback: false,
                error: Some(FetchError::SkippedOffline),
                performance: FetchPerformance::default(),
            };
        }

        if options.use_cache && !options.force_refresh {
            if let Some(payload) = self.cached(resource).await {
                debug!("Served from cache");
                return self.finish(start, FetchSource::Cache, Some(payload), false, None, 0);
            }
        }

        if !online {
            info!("Offline, skipping network");
            return self.fall_back(resource, options, FetchError::Offline, 0, start).await;
        }

        let outcome = retry_while(
            &format!("fetch {}", resource),
            &self.retry,
            || self.attempt(resource),
            TransportError::is_retryable,
        )
        .await;
        let failed = outcome.failed_attempts;

        match outcome.result {
            Ok(payload) => {
                let ttl = options.cache_ttl.unwrap_or_else(|| self.config.cache_ttl());
                let set_options = SetOptions::default().with_ttl(ttl).with_tag(FETCH_CACHE_TAG);
                if let Err(e) = self.cache.set(resource, &payload, set_options).await {
                    warn!(error = %e, "Failed to cache network response");
                }
                self.finish(start, FetchSource::Network, Some(payload), false, None, failed)
            }
            Err(last) => {
                let error = if last.is_retryable() {
                    FetchError::Exhausted { attempts: failed, last }
                } else {
                    FetchError::Transport(last)
                };
                metrics::record_error("fetch", "network", error_label(&error));
                self.fall_back(resource, options, error, failed, start).await
            }
        }
    }

    /// Low-priority fetch of each resource in turn, for warming the cache.
    pub async fn prefetch(&self, resources: &[&str]) -> Vec<FetchResult> {
        let options = FetchOptions::low_priority();
        let mut results = Vec::with_capacity(resources.len());
        for resource in resources {
            results.push(self.fetch(resource, &options).await);
        }
        results
    }

    async fn attempt(&self, resource: &str) -> Result<Value, TransportError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.client.get(resource)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn cached(&self, resource: &str) -> Option<Value> {
        match self.cache.get(resource).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Cache read failed, continuing without it");
                None
            }
        }
    }

    async fn fall_back(
        &self,
        resource: &str,
        options: &FetchOptions,
        error: FetchError,
        failed: usize,
        start: Instant,
    ) -> FetchResult {
        if let Some(payload) = self.cached(resource).await {
            warn!(%error, "Serving cached data as fallback");
            return self.finish(start, FetchSource::Cache, Some(payload), true, None, failed);
        }

        let registered = self.fallbacks.get(resource).map(|p| p.value().clone());
        if let Some(payload) = options.fallback.clone().or(registered) {
            warn!(%error, "Serving static fallback data");
            return self.finish(start, FetchSource::Fallback, Some(payload), true, None, failed);
        }

        warn!(%error, "Fetch failed with no fallback available");
        self.finish(start, FetchSource::Fallback, None, true, Some(error), failed)
    }

    fn finish(
        &self,
        start: Instant,
        source: FetchSource,
        payload: Option<Value>,
        is_fallback: bool,
        error: Option<FetchError>,
        retry_count: usize,
    ) -> FetchResult {
        let elapsed = start.elapsed();
        let success = error.is_none();
        metrics::record_fetch(source.as_str(), success);
        metrics::record_fetch_latency(source.as_str(), elapsed);

        FetchResult {
            success,
            payload,
            source,
            is_fallback,
            error,
            performance: FetchPerformance {
                response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                from_cache: source == FetchSource::Cache,
                retry_count,
            },
        }
    }
}

fn error_label(error: &FetchError) -> &'static str {
    match error {
        FetchError::Transport(e) | FetchError::Exhausted { last: e, .. } => e.label(),
        FetchError::Offline => "offline",
        FetchError::SkippedOffline => "skipped_offline",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Plays back scripted responses, then repeats the last one.
    struct ScriptedClient {
        script: parking_lot::Mutex<VecDeque<Result<Value, TransportError>>>,
        last: parking_lot::Mutex<Option<Result<Value, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(script.into()),
                last: parking_lot::Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceClient for ScriptedClient {
        async fn get(&self, _resource: &str) -> Result<Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(response) => {
                    *self.last.lock() = Some(response.clone());
                    response
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Err(TransportError::Network("no script".into()))),
            }
        }
    }

    fn down() -> Result<Value, TransportError> {
        Err(TransportError::Network("connection refused".into()))
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            request_timeout_ms: 200,
            ..Default::default()
        }
    }

    async fn orchestrator(client: Arc<ScriptedClient>) -> FetchOrchestrator {
        let cache = Arc::new(DurableCache::new(CacheConfig::default()));
        cache.init().await;
        FetchOrchestrator::new(cache, client, fast_config())
    }

    #[tokio::test]
    async fn test_network_success_is_cached() {
        let client = ScriptedClient::new(vec![Ok(json!({"id": "sub_123"}))]);
        let fetcher = orchestrator(client.clone()).await;

        let first = fetcher.fetch("/api/subscription", &FetchOptions::default()).await;
        assert!(first.success);
        assert_eq!(first.source, FetchSource::Network);
        assert_eq!(first.performance.retry_count, 0);
        assert!(!first.performance.from_cache);

        let second = fetcher.fetch("/api/subscription", &FetchOptions::default()).await;
        assert_eq!(second.source, FetchSource::Cache);
        assert!(second.performance.from_cache);
        assert!(!second.is_fallback);
        assert_eq!(second.payload, Some(json!({"id": "sub_123"})));
        assert_eq!(client.calls(), 1);

        let entry = fetcher.cache().peek("/api/subscription").await.unwrap().unwrap();
        assert!(entry.has_tag(FETCH_CACHE_TAG));
        assert_eq!(entry.expires_at - entry.stored_at, 5 * 60 * 1000);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let client = ScriptedClient::new(vec![down(), down(), Ok(json!({"ok": true}))]);
        let fetcher = orchestrator(client.clone()).await;

        let result = fetcher.fetch("/api/subscription", &FetchOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.source, FetchSource::Network);
        assert_eq!(result.performance.retry_count, 2);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let client = ScriptedClient::new(vec![Ok(json!({"v": 1})), Ok(json!({"v": 2}))]);
        let fetcher = orchestrator(client.clone()).await;

        fetcher.fetch("/r", &FetchOptions::default()).await;
        let refreshed = fetcher.fetch("/r", &FetchOptions::forced()).await;
        assert_eq!(refreshed.source, FetchSource::Network);
        assert_eq!(refreshed.payload, Some(json!({"v": 2})));
        assert_eq!(fetcher.cache().get("/r").await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_exhaustion_falls_back_to_cache() {
        let client = ScriptedClient::new(vec![down()]);
        let fetcher = orchestrator(client.clone()).await;
        fetcher
            .cache()
            .set("/r", &json!({"stale": true}), SetOptions::default())
            .await
            .unwrap();

        let result = fetcher.fetch("/r", &FetchOptions::forced()).await;
        assert!(result.success);
        assert!(result.is_fallback);
        assert_eq!(result.source, FetchSource::Cache);
        assert_eq!(result.performance.retry_count, 3);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_falls_back_to_static_then_error() {
        let fetcher = orchestrator(ScriptedClient::new(vec![down()])).await;

        let with_static = fetcher
            .fetch("/r", &FetchOptions::default().with_fallback(json!({"plan": "free"})))
            .await;
        assert!(with_static.success);
        assert_eq!(with_static.source, FetchSource::Fallback);
        assert!(with_static.is_fallback);

        fetcher.register_fallback("/registered", json!({"plan": "basic"}));
        let registered = fetcher.fetch("/registered", &FetchOptions::default()).await;
        assert_eq!(registered.payload, Some(json!({"plan": "basic"})));

        let failed = fetcher.fetch("/nothing", &FetchOptions::default()).await;
        assert!(!failed.success);
        assert!(failed.payload.is_none());
        assert!(matches!(failed.error, Some(FetchError::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let client = ScriptedClient::new(vec![Err(TransportError::Status { status: 404, body: String::new() })]);
        let fetcher = orchestrator(client.clone()).await;

        let result = fetcher.fetch("/missing", &FetchOptions::default()).await;
        assert!(matches!(result.error, Some(FetchError::Transport(TransportError::Status { status: 404, .. }))));
        assert_eq!(result.performance.retry_count, 1);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_attempts_time_out() {
        struct SlowClient;

        #[async_trait]
        impl ResourceClient for SlowClient {
            async fn get(&self, _resource: &str) -> Result<Value, TransportError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            }
        }

        let cache = Arc::new(DurableCache::new(CacheConfig::default()));
        let config = FetchConfig { max_attempts: 1, request_timeout_ms: 20, ..fast_config() };
        let fetcher = FetchOrchestrator::new(cache, Arc::new(SlowClient), config);

        let result = fetcher.fetch("/slow", &FetchOptions::default()).await;
        assert!(matches!(
            result.error,
            Some(FetchError::Exhausted { last: TransportError::Timeout(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_behaviour() {
        let client = ScriptedClient::new(vec![Ok(json!({"v": 1}))]);
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let fetcher = orchestrator(client.clone()).await.with_connectivity(monitor.clone());

        let low = fetcher.fetch("/related", &FetchOptions::low_priority()).await;
        assert!(low.is_skipped());
        assert_eq!(low.performance.retry_count, 0);

        let normal = fetcher.fetch("/r", &FetchOptions::default()).await;
        assert_eq!(normal.error, Some(FetchError::Offline));
        assert_eq!(client.calls(), 0);

        monitor.set_online(true);
        let results = fetcher.prefetch(&["/related"]).await;
        assert!(results[0].success);
        assert_eq!(client.calls(), 1);
    }
}
