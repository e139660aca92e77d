//! Request Execution Manager
//!
//! Runs one exchange REST call end to end: admission through the rate
//! limiter, preparation, per-attempt signing, dispatch with classified
//! retries, and metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use super::recorder::RequestMetricsRecorder;
use crate::application::ports::{HttpTransport, Permit, RateLimiter};
use crate::application::strategy_set::RequestStrategySet;
use crate::domain::error::{ErrorKind, RequestError, TransportError, TransportResult};
use crate::domain::metrics::{DEFAULT_LATENCY_WINDOW, PerformanceSummary};
use crate::domain::request::{
    Headers, HttpMethod, HttpResponse, PreparedRequest, RequestOptions, RequestParams,
};
use crate::infrastructure::config::RequestSettings;
use crate::infrastructure::http::ReqwestTransport;
use crate::infrastructure::metrics::{self, Outcome};
use crate::infrastructure::retry::RetryAfter;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Returns the permit to its limiter when dropped.
struct PermitGuard {
    limiter: Arc<dyn RateLimiter>,
    permit: Option<Permit>,
}

impl PermitGuard {
    fn new(limiter: Arc<dyn RateLimiter>, permit: Permit) -> Self {
        Self {
            limiter,
            permit: Some(permit),
        }
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.limiter.release(permit);
        }
    }
}

/// Executes REST calls for one exchange.
pub struct RequestExecutionManager {
    strategies: RequestStrategySet,
    transport: Arc<dyn HttpTransport>,
    recorder: RequestMetricsRecorder,
    read_timeout: Duration,
}

impl RequestExecutionManager {
    /// Create a manager over a pooled [`ReqwestTransport`] built from the
    /// preparer's request context.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] if the HTTP client cannot be
    /// built.
    pub fn new(strategies: RequestStrategySet) -> TransportResult<Self> {
        let transport = ReqwestTransport::new(&strategies.preparer.request_context())?;
        Ok(Self::with_transport(strategies, Arc::new(transport)))
    }

    /// Create a manager over `transport`.
    #[must_use]
    pub fn with_transport(strategies: RequestStrategySet, transport: Arc<dyn HttpTransport>) -> Self {
        let targets = strategies.preparer.performance_targets();
        let read_timeout = strategies.preparer.request_context().read_timeout;
        Self {
            recorder: RequestMetricsRecorder::new(targets.max_latency, DEFAULT_LATENCY_WINDOW),
            strategies,
            transport,
            read_timeout,
        }
    }

    /// Apply the latency target and window size from `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: &RequestSettings) -> Self {
        self.recorder = RequestMetricsRecorder::new(settings.max_latency, settings.latency_window);
        self
    }

    /// Execute a call with default options.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] carrying the classified failure of
    /// the last attempt, or the admission, preparation, or signing error.
    pub async fn execute(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        body: Option<&Value>,
        headers: &Headers,
    ) -> TransportResult<HttpResponse> {
        self.execute_with(method, endpoint, params, body, headers, RequestOptions::default())
            .await
    }

    /// Execute a call.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_with(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        body: Option<&Value>,
        headers: &Headers,
        options: RequestOptions,
    ) -> TransportResult<HttpResponse> {
        let span = tracing::info_span!(
            "request",
            request_id = %uuid::Uuid::new_v4(),
            method = %method,
            endpoint
        );

        let started = Instant::now();
        let result = self
            .run(method, endpoint, params, body, headers, options)
            .instrument(span)
            .await;
        let latency = started.elapsed();

        match &result {
            Ok(response) => {
                self.recorder.record_success(latency);
                metrics::record_request(Outcome::Success, latency);
                tracing::debug!(
                    endpoint,
                    status = response.status,
                    latency_ms = latency.as_millis(),
                    "Request succeeded"
                );
            }
            Err(error) => {
                let kind = error.kind();
                self.recorder.record_failure(latency, kind);
                metrics::record_request(Outcome::Failure, latency);
                metrics::record_request_failure(kind);
            }
        }
        result
    }

    /// Execute a call and decode its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] if the body does not decode as `T`,
    /// otherwise the same as [`execute`](Self::execute).
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        body: Option<&Value>,
        headers: &Headers,
    ) -> TransportResult<T> {
        let response = self.execute(method, endpoint, params, body, headers).await?;
        serde_json::from_str(&response.body)
            .map_err(|e| TransportError::Parse(format!("{endpoint}: {e}")))
    }

    /// Point-in-time metrics.
    #[must_use]
    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.recorder.summary()
    }

    /// Zero every counter and the latency window.
    pub fn reset_metrics(&self) {
        self.recorder.reset();
    }

    async fn run(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        body: Option<&Value>,
        headers: &Headers,
        options: RequestOptions,
    ) -> TransportResult<HttpResponse> {
        let limiter = &self.strategies.rate_limiter;
        let weight = limiter.weight_for(endpoint);
        let permit = limiter.acquire(weight).await?;
        let _permit = PermitGuard::new(Arc::clone(limiter), permit);

        let prepared = self
            .strategies
            .preparer
            .prepare(method, endpoint, params, headers, body)?;
        let timeout = options.timeout.unwrap_or(self.read_timeout);
        let policy = &self.strategies.retry_policy;
        let max_attempts = policy.max_attempts().max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.sign(&prepared, endpoint, params)?;

            let error = match self.transport.send(request, timeout).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => self.classify_response(&response),
                Err(error) => self.classify_failure(error),
            };

            if error.kind == ErrorKind::RateLimited {
                self.recorder.record_rate_limit_hit();
                metrics::record_rate_limit_hit();
            }

            let eligible =
                method.is_idempotent() || options.allow_retry || error.kind == ErrorKind::RateLimited;
            if attempt >= max_attempts || !eligible || !policy.should_retry(attempt, &error) {
                tracing::warn!(
                    attempt,
                    kind = %error.kind,
                    status = ?error.status,
                    error = %error.message,
                    "Request failed"
                );
                return Err(TransportError::Request(error.with_attempts(attempt)));
            }

            let delay = policy.delay_for(attempt, &error);
            self.recorder.record_retry();
            metrics::record_retry(error.kind);
            tracing::debug!(
                attempt,
                kind = %error.kind,
                delay_ms = delay.as_millis(),
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Sign a fresh copy of `prepared` for one attempt.
    fn sign(
        &self,
        prepared: &PreparedRequest,
        endpoint: &str,
        params: &RequestParams,
    ) -> TransportResult<PreparedRequest> {
        let Some(authenticator) = &self.strategies.authenticator else {
            return Ok(prepared.clone());
        };
        if !authenticator.requires_auth(endpoint) {
            return Ok(prepared.clone());
        }
        let auth = authenticator.sign(
            prepared.method,
            endpoint,
            params,
            prepared.body.as_deref(),
            Utc::now().timestamp_millis(),
        )?;
        Ok(prepared.clone().with_auth(auth))
    }

    fn classify_response(&self, response: &HttpResponse) -> RequestError {
        let kind = self
            .strategies
            .classifier
            .classify(Some(response.status), &response.body);
        let retry_after = response.header("retry-after").and_then(RetryAfter::parse);
        let message: String = response.body.chars().take(MAX_ERROR_BODY).collect();
        RequestError::new(kind, Some(response.status), message).with_retry_after(retry_after)
    }

    fn classify_failure(&self, error: TransportError) -> RequestError {
        if let TransportError::Request(inner) = error {
            return inner;
        }
        let message = error.to_string();
        let kind = if error.kind() == ErrorKind::ClientError {
            ErrorKind::ClientError
        } else {
            self.strategies.classifier.classify(None, &message)
        };
        RequestError::new(kind, None, message)
    }
}
