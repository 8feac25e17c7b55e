// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the resilience layer.
//!
//! # Example
//!
//! ```
//! use dashboard_resilience::ResilienceConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = ResilienceConfig::default();
//! assert_eq!(config.fetch.max_attempts, 3);
//! assert_eq!(config.fetch.cache_ttl(), Duration::from_secs(300));
//!
//! // Override a section
//! let config = ResilienceConfig {
//!     cache: dashboard_resilience::config::CacheConfig {
//!         sql_url: Some("sqlite://dashboard_cache.db?mode=rwc".into()),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.cache.sql_url.is_some());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::auth::Locale;

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub hook: HookConfig,
}

/// Durable cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Structured primary backend (e.g., "sqlite://cache.db?mode=rwc").
    /// When unset, the cache starts on the fallback backend.
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Path of the key/value fallback file. When unset, a volatile
    /// in-memory store is used instead.
    #[serde(default)]
    pub fallback_path: Option<String>,

    /// Prefix applied to every cache key (namespace in shared storage)
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL applied when `set` is called without one (default: 24 hours)
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Capacity of the fallback backend in bytes (default: 5 MB)
    #[serde(default = "default_fallback_max_bytes")]
    pub fallback_max_bytes: usize,

    /// Capacity of the change-notification channel
    #[serde(default = "default_change_channel_capacity")]
    pub change_channel_capacity: usize,
}

fn default_key_prefix() -> String { "dr_cache_".to_string() }
fn default_cache_ttl_ms() -> u64 { 24 * 60 * 60 * 1000 } // 24 hours
fn default_fallback_max_bytes() -> usize { 5 * 1024 * 1024 } // 5 MB
fn default_change_channel_capacity() -> usize { 256 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sql_url: None,
            fallback_path: None,
            key_prefix: default_key_prefix(),
            default_ttl_ms: default_cache_ttl_ms(),
            fallback_max_bytes: default_fallback_max_bytes(),
            change_channel_capacity: default_change_channel_capacity(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Resilient fetch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Base URL that resource paths are resolved against
    #[serde(default)]
    pub base_url: Option<String>,

    /// TTL for network responses written to the cache (default: 5 minutes)
    #[serde(default = "default_fetch_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Total network attempts per fetch, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff before the second attempt, doubled afterwards
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-attempt network timeout (default: 5 seconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_fetch_cache_ttl_ms() -> u64 { 5 * 60 * 1000 } // 5 minutes
fn default_max_attempts() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_request_timeout_ms() -> u64 { 5000 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            cache_ttl_ms: default_fetch_cache_ttl_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Authentication fallback settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the verification endpoints
    #[serde(default = "default_auth_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Lifetime of a backup credential (default: 30 days)
    #[serde(default = "default_backup_ttl_ms")]
    pub backup_ttl_ms: u64,

    /// Prefix for backup credential records
    #[serde(default = "default_backup_prefix")]
    pub backup_prefix: String,

    /// Language of user-facing failure messages
    #[serde(default)]
    pub locale: Locale,
}

fn default_auth_base_url() -> String { "http://localhost:3000".to_string() }
fn default_backup_ttl_ms() -> u64 { 30 * 24 * 60 * 60 * 1000 } // 30 days
fn default_backup_prefix() -> String { "backup_auth_".to_string() }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_auth_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            backup_ttl_ms: default_backup_ttl_ms(),
            backup_prefix: default_backup_prefix(),
            locale: Locale::default(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Resilience hook settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    /// Primary resource requested on mount (e.g., "/api/subscription")
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Cache/fallback results slower than this are reported as degraded
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_ms: u64,

    /// Number of recent fetches kept for rolling metrics
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
}

fn default_resource() -> String { "/api/subscription".to_string() }
fn default_slow_response_ms() -> u64 { 3000 }
fn default_metrics_window() -> usize { 50 }

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            resource: default_resource(),
            slow_response_ms: default_slow_response_ms(),
            metrics_window: default_metrics_window(),
        }
    }
}
