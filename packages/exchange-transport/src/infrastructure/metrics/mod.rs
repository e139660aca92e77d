//! Prometheus Metrics Module
//!
//! Records transport metrics through the `metrics` facade. Without an
//! installed recorder every call is a no-op; [`init_metrics`] installs a
//! Prometheus recorder for processes that want one.
//!
//! # Metrics Categories
//!
//! - **Streaming**: messages received, dropped, parse errors, dispatch latency,
//!   budget violations, reconnects, connection state
//! - **Requests**: requests by outcome, latency, retries, rate-limit hits,
//!   failures by kind

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::error::ErrorKind;
use crate::domain::message::MessageKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once per process.
///
/// Later calls return the handle from the first installation.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "exchange_transport_messages_received_total",
        "Frames received on streaming connections"
    );
    describe_counter!(
        "exchange_transport_messages_dispatched_total",
        "Parsed messages handed to the application by kind"
    );
    describe_counter!(
        "exchange_transport_messages_dropped_total",
        "Frames evicted from a full inbound queue"
    );
    describe_counter!(
        "exchange_transport_parse_errors_total",
        "Frames that failed to parse"
    );
    describe_histogram!(
        "exchange_transport_message_processing_seconds",
        "Parse plus dispatch latency per message"
    );
    describe_counter!(
        "exchange_transport_budget_violations_total",
        "Messages that exceeded the latency budget"
    );
    describe_counter!(
        "exchange_transport_reconnects_total",
        "Reconnection attempts by outcome"
    );
    describe_gauge!(
        "exchange_transport_connection_state",
        "Streaming connection state (0=disconnected .. 6=error)"
    );

    describe_counter!(
        "exchange_transport_requests_total",
        "Request executions by outcome"
    );
    describe_histogram!(
        "exchange_transport_request_duration_seconds",
        "End-to-end request execution latency"
    );
    describe_counter!(
        "exchange_transport_request_retries_total",
        "Retries performed by error kind"
    );
    describe_counter!(
        "exchange_transport_rate_limit_hits_total",
        "Rate-limited responses received"
    );
    describe_counter!(
        "exchange_transport_request_failures_total",
        "Terminal request failures by error kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for reconnection attempts and requests.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Succeeded.
    Success,
    /// Failed.
    Failure,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a frame received on a streaming connection.
pub fn record_message_received() {
    counter!("exchange_transport_messages_received_total").increment(1);
}

/// Record a parsed message handed to the application.
pub fn record_message_dispatched(kind: MessageKind, latency: Duration) {
    counter!(
        "exchange_transport_messages_dispatched_total",
        "kind" => kind.as_str()
    )
    .increment(1);
    histogram!("exchange_transport_message_processing_seconds").record(latency.as_secs_f64());
}

/// Record frames evicted from a full queue.
pub fn record_messages_dropped(count: u64) {
    counter!("exchange_transport_messages_dropped_total").increment(count);
}

/// Record a frame that failed to parse.
pub fn record_parse_error() {
    counter!("exchange_transport_parse_errors_total").increment(1);
}

/// Record a message that exceeded the latency budget.
pub fn record_budget_violation() {
    counter!("exchange_transport_budget_violations_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(outcome: Outcome) {
    counter!(
        "exchange_transport_reconnects_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("exchange_transport_connection_state").set(state.as_gauge());
}

/// Record a completed request execution.
pub fn record_request(outcome: Outcome, latency: Duration) {
    counter!(
        "exchange_transport_requests_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("exchange_transport_request_duration_seconds").record(latency.as_secs_f64());
}

/// Record a retry.
pub fn record_retry(kind: ErrorKind) {
    counter!(
        "exchange_transport_request_retries_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a rate-limited response.
pub fn record_rate_limit_hit() {
    counter!("exchange_transport_rate_limit_hits_total").increment(1);
}

/// Record a terminal request failure.
pub fn record_request_failure(kind: ErrorKind) {
    counter!(
        "exchange_transport_request_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received();
        record_message_dispatched(MessageKind::Trade, Duration::from_micros(200));
        record_messages_dropped(3);
        record_parse_error();
        record_budget_violation();
        record_reconnect(Outcome::Failure);
        set_connection_state(ConnectionState::Connected);
        record_retry(ErrorKind::ServerError);
        record_rate_limit_hit();
        record_request_failure(ErrorKind::Timeout);
    }

    #[test]
    fn prometheus_handle_renders_recorded_metrics() {
        let handle = init_metrics().unwrap();
        record_request(Outcome::Success, Duration::from_millis(3));
        record_rate_limit_hit();

        let rendered = handle.render();
        assert!(rendered.contains("exchange_transport_requests_total"));
        assert!(rendered.contains("exchange_transport_rate_limit_hits_total"));
        assert!(get_metrics_handle().is_some());
        assert!(init_metrics().is_ok());
    }
}
