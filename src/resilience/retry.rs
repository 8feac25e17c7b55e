// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Unlike a plain `Result`, [`retry`] reports how many attempts failed so
//! callers can surface it (the fetch orchestrator's `retry_count`).
//!
//! # Example
//!
//! ```
//! use dashboard_resilience::RetryConfig;
//! use std::time::Duration;
//!
//! // Capability probe: give up almost immediately
//! let probe = RetryConfig::probe();
//! assert_eq!(probe.max_attempts, 2);
//!
//! // Network fetch: 3 attempts, 1s then 2s backoff
//! let fetch = RetryConfig::fetch();
//! assert_eq!(fetch.max_attempts, 3);
//! assert_eq!(fetch.initial_delay, Duration::from_secs(1));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::FetchConfig;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, first one included. Zero is treated as one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fetch()
    }
}

impl RetryConfig {
    /// Fast-fail for backend capability probing during cache init.
    #[must_use]
    pub fn probe() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(50),
            factor: 1.0,
        }
    }

    /// Network fetch defaults: 3 attempts, doubling from 1s.
    #[must_use]
    pub fn fetch() -> Self {
        Self::from_fetch_config(&FetchConfig::default())
    }

    #[must_use]
    pub fn from_fetch_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before the attempt following `failed` failures (1-based).
    #[must_use]
    pub fn delay_after(&self, failed: usize) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..failed {
            if delay >= self.max_delay {
                break;
            }
            delay = self.next_delay(delay);
        }
        delay
    }

    /// One backoff step from `delay`, capped at `max_delay`. A product that
    /// does not fit a `Duration` (or a negative or NaN factor) gives the cap.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Outcome of [`retry`] together with the number of failed attempts.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub failed_attempts: usize,
}

impl<T, E> Retried<T, E> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(operation_name, config, operation, |_| true).await
}

/// Like [`retry`], but gives up at once on an error `retryable` rejects.
pub async fn retry_while<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    retryable: P,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut failed = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if failed > 0 {
                    info!("Operation '{}' succeeded after {} failed attempts", operation_name, failed);
                }
                return Retried { result: Ok(val), failed_attempts: failed };
            }
            Err(err) => {
                failed += 1;

                if !retryable(&err) {
                    warn!("Operation '{}' failed permanently: {}", operation_name, err);
                    return Retried { result: Err(err), failed_attempts: failed };
                }

                if failed >= max_attempts {
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Giving up",
                        operation_name, failed, max_attempts, err
                    );
                    return Retried { result: Err(err), failed_attempts: failed };
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, failed, max_attempts, err, delay
                );
                crate::metrics::record_retry(operation_name);

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
