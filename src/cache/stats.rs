// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Running operation counters for the durable cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    latency_micros: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record(&self, success: bool, latency: Duration) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_backend: Option<&'static str>) -> CacheMetricsSnapshot {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let latency = self.latency_micros.load(Ordering::Relaxed);
        CacheMetricsSnapshot {
            operations_attempted: attempted,
            operations_succeeded: self.succeeded.load(Ordering::Relaxed),
            operations_failed: self.failed.load(Ordering::Relaxed),
            average_latency_ms: if attempted == 0 {
                0.0
            } else {
                latency as f64 / attempted as f64 / 1000.0
            },
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_purged: self.expired.load(Ordering::Relaxed),
            active_backend,
        }
    }
}

/// Point-in-time view of the cache's operational counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub operations_attempted: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub average_latency_ms: f64,
    pub hits: u64,
    pub misses: u64,
    pub expired_purged: u64,
    /// Backend serving reads, `None` before `init` or when nothing is usable
    pub active_backend: Option<&'static str>,
}

impl CacheMetricsSnapshot {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
