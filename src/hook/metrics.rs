// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rolling fetch metrics over the last N results.

use std::collections::VecDeque;

use crate::fetch::FetchResult;

#[derive(Debug, Clone, Copy)]
struct Sample {
    response_time_ms: u64,
    from_cache: bool,
    success: bool,
}

#[derive(Debug)]
pub(crate) struct RollingMetrics {
    window: usize,
    samples: VecDeque<Sample>,
}

impl RollingMetrics {
    pub(crate) fn new(window: usize) -> Self {
        let window = window.max(1);
        Self { window, samples: VecDeque::with_capacity(window) }
    }

    pub(crate) fn record(&mut self, result: &FetchResult) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            response_time_ms: result.performance.response_time_ms,
            from_cache: result.performance.from_cache,
            success: result.success,
        });
    }

    pub(crate) fn snapshot(&self) -> HookMetricsSnapshot {
        let count = self.samples.len();
        if count == 0 {
            return HookMetricsSnapshot::default();
        }
        let total_ms: u64 = self.samples.iter().map(|s| s.response_time_ms).sum();
        let hits = self.samples.iter().filter(|s| s.from_cache).count();
        let errors = self.samples.iter().filter(|s| !s.success).count();

        HookMetricsSnapshot {
            samples: count,
            average_response_time_ms: total_ms as f64 / count as f64,
            cache_hit_rate: hits as f64 / count as f64,
            error_rate: errors as f64 / count as f64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookMetricsSnapshot {
    /// Results in the window
    pub samples: usize,
    pub average_response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchPerformance, FetchSource};

    fn result(ms: u64, from_cache: bool, success: bool) -> FetchResult {
        FetchResult {
            success,
            payload: None,
            source: if from_cache { FetchSource::Cache } else { FetchSource::Network },
            is_fallback: false,
            error: None,
            performance: FetchPerformance { response_time_ms: ms, from_cache, retry_count: 0 },
        }
    }

    #[test]
    fn test_empty_window() {
        assert_eq!(RollingMetrics::new(5).snapshot(), HookMetricsSnapshot::default());
    }

    #[test]
    fn test_rates_and_average() {
        let mut metrics = RollingMetrics::new(10);
        metrics.record(&result(100, false, true));
        metrics.record(&result(10, true, true));
        metrics.record(&result(300, false, false));
        metrics.record(&result(10, true, true));

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 4);
        assert!((snap.average_response_time_ms - 105.0).abs() < f64::EPSILON);
        assert!((snap.cache_hit_rate - 0.5).abs() < f64::EPSILON);
        assert!((snap.error_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut metrics = RollingMetrics::new(2);
        metrics.record(&result(1000, false, false));
        metrics.record(&result(10, true, true));
        metrics.record(&result(30, true, true));

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 2);
        assert_eq!(snap.error_rate, 0.0);
        assert!((snap.average_response_time_ms - 20.0).abs() < f64::EPSILON);
    }
}
