//! Metrics recorders owned by the managers.
//!
//! Each keeps its counters and latency window under one lock, so a snapshot
//! is always internally consistent.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::error::ErrorKind;
use crate::domain::metrics::{LatencyWindow, PerformanceMetrics, PerformanceSummary};

// =============================================================================
// Streaming
// =============================================================================

#[derive(Debug)]
struct StreamCounters {
    window: LatencyWindow,
    total: u64,
    sub_budget: u64,
    violations: u64,
    reconnections: u64,
    errors: u64,
    parse_errors: u64,
    last_message_at: Option<DateTime<Utc>>,
}

/// Streaming-side recorder.
#[derive(Debug)]
pub struct StreamMetricsRecorder {
    inner: Mutex<StreamCounters>,
    budget: Duration,
}

impl StreamMetricsRecorder {
    /// Create a recorder measuring against `budget`.
    #[must_use]
    pub fn new(budget: Duration, window: usize) -> Self {
        Self {
            inner: Mutex::new(StreamCounters {
                window: LatencyWindow::new(window),
                total: 0,
                sub_budget: 0,
                violations: 0,
                reconnections: 0,
                errors: 0,
                parse_errors: 0,
                last_message_at: None,
            }),
            budget,
        }
    }

    /// Record a dispatched message. Returns `true` if it was within budget.
    pub fn record_processed(&self, latency: Duration, received_at: DateTime<Utc>) -> bool {
        let within = latency <= self.budget;
        let mut inner = self.inner.lock();
        inner.window.record(latency);
        inner.total += 1;
        if within {
            inner.sub_budget += 1;
        } else {
            inner.violations += 1;
        }
        inner.last_message_at = Some(received_at);
        within
    }

    /// Record a frame that failed to parse.
    pub fn record_parse_error(&self) {
        self.inner.lock().parse_errors += 1;
    }

    /// Record a connection-level error.
    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    /// Record a successful reconnection.
    pub fn record_reconnection(&self) {
        self.inner.lock().reconnections += 1;
    }

    /// Snapshot, with the queue's overflow count.
    #[must_use]
    pub fn snapshot(&self, dropped_messages: u64) -> PerformanceMetrics {
        let inner = self.inner.lock();
        PerformanceMetrics {
            total_messages: inner.total,
            avg_latency: inner.window.average(),
            p95_latency: inner.window.percentile(0.95),
            p99_latency: inner.window.percentile(0.99),
            sub_budget_messages: inner.sub_budget,
            budget_violations: inner.violations,
            reconnections: inner.reconnections,
            errors: inner.errors,
            parse_errors: inner.parse_errors,
            dropped_messages,
            last_message_at: inner.last_message_at,
        }
    }
}

// =============================================================================
// Request/Response
// =============================================================================

#[derive(Debug)]
struct RequestCounters {
    window: LatencyWindow,
    total: u64,
    success: u64,
    failure: u64,
    rate_limit_hits: u64,
    retries: u64,
    compliant: u64,
    violations: u64,
    failures_by_kind: BTreeMap<ErrorKind, u64>,
}

impl RequestCounters {
    fn new(window: usize) -> Self {
        Self {
            window: LatencyWindow::new(window),
            total: 0,
            success: 0,
            failure: 0,
            rate_limit_hits: 0,
            retries: 0,
            compliant: 0,
            violations: 0,
            failures_by_kind: BTreeMap::new(),
        }
    }

    fn record_latency(&mut self, latency: Duration, target: Duration) {
        self.window.record(latency);
        self.total += 1;
        if latency <= target {
            self.compliant += 1;
        } else {
            self.violations += 1;
        }
    }
}

/// Request-side recorder.
#[derive(Debug)]
pub struct RequestMetricsRecorder {
    inner: Mutex<RequestCounters>,
    window: usize,
    max_latency: Duration,
}

impl RequestMetricsRecorder {
    /// Create a recorder measuring against `max_latency`.
    #[must_use]
    pub fn new(max_latency: Duration, window: usize) -> Self {
        Self {
            inner: Mutex::new(RequestCounters::new(window)),
            window,
            max_latency,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.record_latency(latency, self.max_latency);
        inner.success += 1;
    }

    /// Record a terminal failure.
    pub fn record_failure(&self, latency: Duration, kind: ErrorKind) {
        let mut inner = self.inner.lock();
        inner.record_latency(latency, self.max_latency);
        inner.failure += 1;
        *inner.failures_by_kind.entry(kind).or_insert(0) += 1;
    }

    /// Record a retry.
    pub fn record_retry(&self) {
        self.inner.lock().retries += 1;
    }

    /// Record a rate-limited response.
    pub fn record_rate_limit_hit(&self) {
        self.inner.lock().rate_limit_hits += 1;
    }

    /// Point-in-time summary.
    #[must_use]
    pub fn summary(&self) -> PerformanceSummary {
        let inner = self.inner.lock();
        PerformanceSummary {
            total_requests: inner.total,
            successful_requests: inner.success,
            failed_requests: inner.failure,
            rate_limit_hits: inner.rate_limit_hits,
            retries: inner.retries,
            compliant_requests: inner.compliant,
            latency_violations: inner.violations,
            avg_latency: inner.window.average(),
            p50_latency: inner.window.percentile(0.50),
            p95_latency: inner.window.percentile(0.95),
            p99_latency: inner.window.percentile(0.99),
            failures_by_kind: inner.failures_by_kind.clone(),
        }
    }

    /// Zero every counter and the latency window.
    pub fn reset(&self) {
        *self.inner.lock() = RequestCounters::new(self.window);
    }
}
