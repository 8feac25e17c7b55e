// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the resilience layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `dashboard_resilience_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: sql, file, memory
//! - `operation`: get, set, delete, clear, cleanup, sync
//! - `status`: success, error
//! - `source`: network, cache, fallback

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache operation against a backend
pub fn record_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "dashboard_resilience_cache_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "dashboard_resilience_cache_operation_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "dashboard_resilience_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a read or write served by the fallback after a primary fault
pub fn record_backend_failover(from: &str, to: &str) {
    counter!(
        "dashboard_resilience_backend_failover_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record fallback copies written back once the primary answers again
pub fn record_write_back(count: usize) {
    counter!("dashboard_resilience_cache_write_back_total").increment(count as u64);
}

/// Record entries purged because their TTL elapsed
pub fn record_expired(count: usize) {
    counter!("dashboard_resilience_cache_expired_total").increment(count as u64);
}

/// Set approximate cache size
pub fn set_cache_usage(items: usize, bytes: usize) {
    gauge!("dashboard_resilience_cache_items").set(items as f64);
    gauge!("dashboard_resilience_cache_bytes").set(bytes as f64);
}

/// Record a pending-sync replay batch
pub fn record_sync(successful: usize, failed: usize) {
    counter!("dashboard_resilience_sync_items_total", "status" => "success")
        .increment(successful as u64);
    counter!("dashboard_resilience_sync_items_total", "status" => "failure")
        .increment(failed as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// FETCH
// ═══════════════════════════════════════════════════════════════════════════

/// Record a retry scheduled after a failed attempt
pub fn record_retry(operation: &str) {
    counter!(
        "dashboard_resilience_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a completed fetch by where its data came from
pub fn record_fetch(source: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "dashboard_resilience_fetch_total",
        "source" => source.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record end-to-end fetch latency
pub fn record_fetch_latency(source: &str, duration: Duration) {
    histogram!(
        "dashboard_resilience_fetch_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// AUTH
// ═══════════════════════════════════════════════════════════════════════════

/// Record an authentication attempt outcome
pub fn record_auth_attempt(method: &str, outcome: &str) {
    counter!(
        "dashboard_resilience_auth_attempts_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a verification challenge dispatch
pub fn record_challenge_sent(method: &str) {
    counter!(
        "dashboard_resilience_auth_challenges_total",
        "method" => method.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// HOOK
// ═══════════════════════════════════════════════════════════════════════════

/// Set connectivity (1 = online, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("dashboard_resilience_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a hook state transition
pub fn record_state_transition(state: &str) {
    counter!(
        "dashboard_resilience_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
