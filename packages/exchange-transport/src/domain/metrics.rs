//! Performance Snapshots
//!
//! Point-in-time views of streaming and request performance, plus the rolling
//! latency window both are computed from.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ErrorKind;

/// Default number of latency samples retained.
pub const DEFAULT_LATENCY_WINDOW: usize = 1000;

/// Rolling window of the most recent latency samples.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl LatencyWindow {
    /// Create a window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the held samples.
    #[must_use]
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        total / count
    }

    /// Nearest-rank percentile, `quantile` in `[0, 1]`.
    #[must_use]
    pub fn percentile(&self, quantile: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let rank = (quantile.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Streaming performance snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    /// Messages dispatched to the application.
    pub total_messages: u64,
    /// Mean parse-plus-dispatch latency.
    pub avg_latency: Duration,
    /// 95th percentile latency.
    pub p95_latency: Duration,
    /// 99th percentile latency.
    pub p99_latency: Duration,
    /// Messages handled within the latency budget.
    pub sub_budget_messages: u64,
    /// Messages that exceeded the latency budget.
    pub budget_violations: u64,
    /// Successful reconnections.
    pub reconnections: u64,
    /// Connection-level errors observed.
    pub errors: u64,
    /// Frames that failed to parse.
    pub parse_errors: u64,
    /// Frames evicted from a full inbound queue.
    pub dropped_messages: u64,
    /// Arrival time of the last dispatched message.
    pub last_message_at: Option<DateTime<Utc>>,
}

impl PerformanceMetrics {
    /// Share of dispatched messages handled within budget, in `[0, 1]`.
    #[must_use]
    pub fn hft_compliance_rate(&self) -> f64 {
        ratio(self.sub_budget_messages, self.total_messages)
    }
}

/// Request execution performance snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    /// Calls to `execute`.
    pub total_requests: u64,
    /// Calls that returned a 2xx response.
    pub successful_requests: u64,
    /// Calls that failed terminally.
    pub failed_requests: u64,
    /// 429 responses observed, across all attempts.
    pub rate_limit_hits: u64,
    /// Retries performed.
    pub retries: u64,
    /// Calls completed within the latency target.
    pub compliant_requests: u64,
    /// Calls that exceeded the latency target.
    pub latency_violations: u64,
    /// Mean end-to-end latency.
    pub avg_latency: Duration,
    /// Median latency.
    pub p50_latency: Duration,
    /// 95th percentile latency.
    pub p95_latency: Duration,
    /// 99th percentile latency.
    pub p99_latency: Duration,
    /// Terminal failures by kind.
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
}

impl PerformanceSummary {
    /// Share of calls completed within the latency target, in `[0, 1]`.
    #[must_use]
    pub fn compliance_rate(&self) -> f64 {
        ratio(self.compliant_requests, self.total_requests)
    }

    /// Share of calls that succeeded, in `[0, 1]`.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful_requests, self.total_requests)
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest() {
        let mut window = LatencyWindow::new(3);
        for ms in [10, 20, 30, 40] {
            window.record(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Duration::from_millis(30));
    }

    #[test]
    fn window_percentiles() {
        let mut window = LatencyWindow::new(100);
        for ms in 1..=100 {
            window.record(Duration::from_millis(ms));
        }
        assert_eq!(window.percentile(0.5), Duration::from_millis(50));
        assert_eq!(window.percentile(0.95), Duration::from_millis(95));
        assert_eq!(window.percentile(0.99), Duration::from_millis(99));
        assert_eq!(window.percentile(0.0), Duration::from_millis(1));
    }

    #[test]
    fn empty_window_reports_zero() {
        let window = LatencyWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.average(), Duration::ZERO);
        assert_eq!(window.percentile(0.99), Duration::ZERO);
    }

    #[test]
    fn compliance_rates() {
        let metrics = PerformanceMetrics {
            total_messages: 4,
            sub_budget_messages: 3,
            ..PerformanceMetrics::default()
        };
        assert!((metrics.hft_compliance_rate() - 0.75).abs() < f64::EPSILON);
        assert!(PerformanceSummary::default().compliance_rate().abs() < f64::EPSILON);
    }
}
