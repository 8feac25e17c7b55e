// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Permanent failure, not retried
    #[error("request failed: {0}")]
    Transport(TransportError),
    /// Known offline and nothing cached or registered to fall back on
    #[error("offline and no fallback data for this resource")]
    Offline,
    /// Low-priority request dropped while offline
    #[error("low-priority request skipped while offline")]
    SkippedOffline,
    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted { attempts: usize, last: TransportError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPriority {
    #[default]
    Normal,
    /// Prefetch of secondary data; dropped while offline
    Low,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Serve a valid cached entry without touching the network
    pub use_cache: bool,
    /// Go to the network even when a cached entry is valid
    pub force_refresh: bool,
    pub priority: FetchPriority,
    /// Static payload used when network and cache both come up empty
    pub fallback: Option<Value>,
    /// TTL for the cached response, overriding the configured one
    pub cache_ttl: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            priority: FetchPriority::Normal,
            fallback: None,
            cache_ttl: None,
        }
    }
}

impl FetchOptions {
    /// Bypass the cache entirely.
    #[must_use]
    pub fn forced() -> Self {
        Self { use_cache: false, force_refresh: true, ..Default::default() }
    }

    #[must_use]
    pub fn low_priority() -> Self {
        Self { priority: FetchPriority::Low, ..Default::default() }
    }

    #[must_use]
    pub fn with_fallback(mut self, payload: Value) -> Self {
        self.fallback = Some(payload);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Network,
    Cache,
    Fallback,
}

impl FetchSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPerformance {
    pub response_time_ms: u64,
    pub from_cache: bool,
    /// Failed network attempts made by this call
    pub retry_count: usize,
}

/// Outcome of one [`fetch`](super::FetchOrchestrator::fetch).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub success: bool,
    pub payload: Option<Value>,
    /// Where the payload came from. Failures report the last source tried.
    pub source: FetchSource,
    pub is_fallback: bool,
    pub error: Option<FetchError>,
    pub performance: FetchPerformance,
}

impl FetchResult {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.error, Some(FetchError::SkippedOffline))
    }
}
