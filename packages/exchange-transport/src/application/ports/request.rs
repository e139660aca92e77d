//! Request/response strategy ports.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;

use crate::domain::error::{ErrorKind, RequestError, TransportResult};
use crate::domain::request::{
    AuthenticationData, Headers, HttpMethod, HttpResponse, PerformanceTargets, PreparedRequest,
    RequestContext, RequestParams,
};

/// Builds exchange requests.
pub trait RequestPreparer: Send + Sync {
    /// Turn call arguments into a dispatchable request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TransportError::InvalidRequest`] when the arguments
    /// cannot form a request.
    fn prepare(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        headers: &Headers,
        body: Option<&Value>,
    ) -> TransportResult<PreparedRequest>;

    /// Latency and retry budgets.
    fn performance_targets(&self) -> PerformanceTargets {
        PerformanceTargets::default()
    }

    /// Pool and timeout parameters.
    fn request_context(&self) -> RequestContext;
}

/// Signs private requests.
pub trait Authenticator: Send + Sync {
    /// Whether `endpoint` needs a signature.
    fn requires_auth(&self, endpoint: &str) -> bool;

    /// Produce signing material for one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TransportError::AuthenticationFailed`] if signing fails.
    fn sign(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        body: Option<&str>,
        timestamp_ms: i64,
    ) -> TransportResult<AuthenticationData>;
}

/// Admission token issued by a [`RateLimiter`].
///
/// Not `Clone`; it is handed back to [`RateLimiter::release`] exactly once.
#[derive(Debug)]
pub struct Permit {
    id: u64,
    weight: u32,
    acquired_at: Instant,
    slot: Option<OwnedSemaphorePermit>,
}

impl Permit {
    /// Create a permit.
    #[must_use]
    pub fn new(id: u64, weight: u32) -> Self {
        Self {
            id,
            weight,
            acquired_at: Instant::now(),
            slot: None,
        }
    }

    /// Attach a concurrency slot, freed when the permit is dropped.
    #[must_use]
    pub fn with_slot(mut self, slot: OwnedSemaphorePermit) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Limiter-assigned id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Weight charged.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Time since admission.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Client-side admission control.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait for admission of a call weighing `weight`.
    ///
    /// Bounded by the limiter's own timeout.
    async fn acquire(&self, weight: u32) -> TransportResult<Permit>;

    /// Return a permit.
    fn release(&self, permit: Permit);

    /// Weight charged for `endpoint`.
    fn weight_for(&self, endpoint: &str) -> u32 {
        let _ = endpoint;
        1
    }
}

/// Retry decisions for failed attempts.
pub trait RetryPolicy: Send + Sync {
    /// Dispatch attempts allowed per call, including the first.
    fn max_attempts(&self) -> u32;

    /// Whether to retry after the 1-based `attempt` failed with `error`.
    fn should_retry(&self, attempt: u32, error: &RequestError) -> bool;

    /// Pause before the attempt following `attempt`.
    fn delay_for(&self, attempt: u32, error: &RequestError) -> Duration;
}

/// Maps raw failures onto the error taxonomy.
pub trait ExceptionClassifier: Send + Sync {
    /// Classify a failure from its status (if a response arrived) and body or
    /// error text.
    fn classify(&self, status: Option<u16>, body: &str) -> ErrorKind;
}

/// Pooled HTTP surface.
///
/// Returns `Ok` for any received response, whatever its status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Dispatch one request, bounded by `timeout`.
    async fn send(&self, request: PreparedRequest, timeout: Duration)
    -> TransportResult<HttpResponse>;
}
