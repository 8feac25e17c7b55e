//! # Dashboard Resilience
//!
//! Client-side resilience layer for a subscriber dashboard: keeps
//! subscription data visible and lets the user re-authenticate while the
//! backend, the network, or the primary identity provider is degraded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ResilienceHook                          │
//! │  • Loading / ReadyOnline / ReadyOfflineCached / Degraded    │
//! │  • Connectivity transitions, pending-mutation replay       │
//! │  • Rolling response-time / hit-rate / error-rate metrics   │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │     FetchOrchestrator        │   │   AuthFallbackManager    │
//! │  • Cache-first / forced      │   │  • Priority catalog      │
//! │  • Retry with backoff        │   │  • Two-phase code flows  │
//! │  • Cache → static → error    │   │  • Backup credentials    │
//! └──────────────────────────────┘   └──────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DurableCache                           │
//! │  • SQLite primary, JSON-file fallback, picked by probing   │
//! │  • TTL with lazy eviction, tags, pending-sync queue        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashboard_resilience::{ConnectivityMonitor, ResilienceConfig, ResilienceHook};
//! use dashboard_resilience::config::{CacheConfig, FetchConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ResilienceConfig {
//!         cache: CacheConfig {
//!             sql_url: Some("sqlite://dashboard_cache.db?mode=rwc".into()),
//!             fallback_path: Some("dashboard_cache.json".into()),
//!             ..Default::default()
//!         },
//!         fetch: FetchConfig {
//!             base_url: Some("https://api.example.com".into()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let connectivity = Arc::new(ConnectivityMonitor::new(true));
//!     let hook = ResilienceHook::build(config, connectivity).await.expect("bad config");
//!
//!     let state = hook.mount().await;
//!     if let Some(status) = state.field("status") {
//!         println!("subscription is {} ({})", status, state.status);
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: The [`DurableCache`] engine
//! - [`storage`]: Storage backends (SQLite, JSON file, memory)
//! - [`auth`]: The [`AuthFallbackManager`] chain and backup credentials
//! - [`fetch`]: The [`FetchOrchestrator`]
//! - [`hook`]: The [`ResilienceHook`] composition
//! - [`resilience`]: Retry with backoff
//! - [`connectivity`]: Online/offline signal

pub mod config;
pub mod storage;
pub mod cache;
pub mod auth;
pub mod transport;
pub mod fetch;
pub mod resilience;
pub mod connectivity;
pub mod hook;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::ResilienceConfig;
pub use storage::{StorageBackend, StorageError};
pub use cache::{CacheEntry, CacheMetricsSnapshot, DurableCache, PendingSyncItem, SetOptions, SyncReport};
pub use auth::{AuthError, AuthFallbackManager, AuthMethod, AuthMethodType, AuthOutcome, BackupCredential, Credentials};
pub use transport::TransportError;
pub use fetch::{FetchError, FetchOptions, FetchOrchestrator, FetchResult, FetchSource};
pub use resilience::retry::RetryConfig;
pub use connectivity::ConnectivityMonitor;
pub use hook::{HookState, HookStatus, ResilienceHook};
pub use metrics::LatencyTimer;
