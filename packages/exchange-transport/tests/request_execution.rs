//! Request execution manager against a scripted HTTP transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exchange_transport::{
    AuthenticationData, Authenticator, ErrorKind, ExponentialBackoffRetry, Headers,
    HttpMethod, HttpResponse, HttpStatusClassifier, HttpTransport, PreparedRequest,
    RateLimitContext, RequestContext, RequestExecutionManager, RequestOptions, RequestParams,
    RequestPreparer, RequestStrategySet, RetryConfig, TokenBucketRateLimiter, TransportError,
    TransportResult,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Fakes
// =============================================================================

struct JsonPreparer;

impl RequestPreparer for JsonPreparer {
    fn prepare(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &RequestParams,
        headers: &Headers,
        body: Option<&Value>,
    ) -> TransportResult<PreparedRequest> {
        if endpoint == "/bad" {
            return Err(TransportError::InvalidRequest("unknown endpoint".to_string()));
        }
        let mut request = PreparedRequest::new(method, self.request_context().url_for(endpoint));
        request.query = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        request.headers = headers.clone();
        request.body = body.map(Value::to_string);
        Ok(request)
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::new("https://api.example.test")
    }
}

struct HeaderSigner {
    signatures: AtomicU32,
}

impl Authenticator for HeaderSigner {
    fn requires_auth(&self, endpoint: &str) -> bool {
        endpoint.starts_with("/private")
    }

    fn sign(
        &self,
        _method: HttpMethod,
        endpoint: &str,
        _params: &RequestParams,
        _body: Option<&str>,
        timestamp_ms: i64,
    ) -> TransportResult<AuthenticationData> {
        if endpoint == "/private/locked" {
            return Err(TransportError::AuthenticationFailed("key revoked".to_string()));
        }
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(AuthenticationData {
            headers: Headers::from([("x-timestamp".to_string(), timestamp_ms.to_string())]),
            ..AuthenticationData::default()
        })
    }
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResult<HttpResponse>>>,
    seen: Mutex<Vec<PreparedRequest>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    latency: Duration,
}

impl ScriptedTransport {
    fn with_script(script: Vec<TransportResult<HttpResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    fn dispatched(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(
        &self,
        request: PreparedRequest,
        _timeout: Duration,
    ) -> TransportResult<HttpResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(response(200, r#"{"ok":true}"#)))
    }
}

fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: Headers::new(),
        body: body.to_string(),
        latency: Duration::from_millis(1),
    }
}

fn rate_limited(retry_after: &str) -> HttpResponse {
    let mut response = response(429, "too many requests");
    response
        .headers
        .insert("retry-after".to_string(), retry_after.to_string());
    response
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    manager: RequestExecutionManager,
    transport: Arc<ScriptedTransport>,
    limiter: Arc<TokenBucketRateLimiter>,
    signer: Arc<HeaderSigner>,
}

fn harness(transport: Arc<ScriptedTransport>, burst: u32) -> Harness {
    let limiter = Arc::new(TokenBucketRateLimiter::new(RateLimitContext {
        requests_per_second: 1000.0,
        burst_capacity: burst,
        ..RateLimitContext::default()
    }));
    let signer = Arc::new(HeaderSigner {
        signatures: AtomicU32::new(0),
    });
    let retry = ExponentialBackoffRetry::new(RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter_factor: 0.0,
        ..RetryConfig::default()
    });

    let strategies = RequestStrategySet::builder()
        .preparer(Arc::new(JsonPreparer))
        .authenticator(Arc::clone(&signer) as Arc<dyn Authenticator>)
        .rate_limiter(Arc::clone(&limiter) as Arc<dyn exchange_transport::RateLimiter>)
        .retry_policy(Arc::new(retry))
        .classifier(Arc::new(HttpStatusClassifier))
        .build()
        .unwrap();

    Harness {
        manager: RequestExecutionManager::with_transport(
            strategies,
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
        ),
        transport,
        limiter,
        signer,
    }
}

async fn get(h: &Harness, endpoint: &str) -> TransportResult<HttpResponse> {
    h.manager
        .execute(
            HttpMethod::Get,
            endpoint,
            &RequestParams::new(),
            None,
            &Headers::new(),
        )
        .await
}

async fn post(h: &Harness, options: RequestOptions) -> TransportResult<HttpResponse> {
    h.manager
        .execute_with(
            HttpMethod::Post,
            "/v1/order",
            &RequestParams::new(),
            Some(&json!({"symbol": "BTCUSDT", "qty": 1})),
            &Headers::new(),
            options,
        )
        .await
}

fn request_error(error: TransportError) -> exchange_transport::RequestError {
    match error {
        TransportError::Request(inner) => inner,
        other => panic!("expected a request error, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn single_slot_limiter_serializes_calls() {
    let h = harness(ScriptedTransport::slow(Duration::from_millis(30)), 1);

    let (first, second) = tokio::join!(get(&h, "/v1/time"), get(&h, "/v1/time"));
    assert_ok!(first);
    assert_ok!(second);
    assert_eq!(h.transport.dispatched(), 2);
    assert_eq!(h.transport.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_stop_at_max_attempts() {
    let transport = ScriptedTransport::with_script(vec![
        Ok(response(500, "boom")),
        Ok(response(502, "boom")),
        Ok(response(503, "boom")),
        Ok(response(200, "{}")),
    ]);
    let h = harness(transport, 4);

    let error = request_error(assert_err!(get(&h, "/v1/ticker").await));
    assert_eq!(error.kind, ErrorKind::ServerError);
    assert_eq!(error.status, Some(503));
    assert_eq!(error.attempts, 3);
    assert_eq!(h.transport.dispatched(), 3);

    let stats = h.limiter.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.in_flight, 0);

    let summary = h.manager.get_performance_summary();
    assert_eq!(summary.failed_requests, 1);
    assert_eq!(summary.retries, 2);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::ServerError), Some(&1));
}

#[tokio::test]
async fn permit_is_released_on_success_and_client_error() {
    let transport = ScriptedTransport::with_script(vec![
        Ok(response(200, "{}")),
        Ok(response(400, "bad symbol")),
    ]);
    let h = harness(transport, 2);

    assert_ok!(get(&h, "/v1/ticker").await);
    let error = request_error(assert_err!(get(&h, "/v1/ticker").await));
    assert_eq!(error.kind, ErrorKind::ClientError);
    assert_eq!(error.attempts, 1);

    let stats = h.limiter.stats();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.released, 2);
    assert_eq!(h.transport.dispatched(), 2);
}

#[tokio::test]
async fn permit_is_released_when_preparation_or_signing_fails() {
    let h = harness(ScriptedTransport::with_script(Vec::new()), 2);

    let prepare = assert_err!(get(&h, "/bad").await);
    assert!(matches!(prepare, TransportError::InvalidRequest(_)));
    let sign = assert_err!(get(&h, "/private/locked").await);
    assert!(matches!(sign, TransportError::AuthenticationFailed(_)));

    let stats = h.limiter.stats();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.released, 2);
    assert_eq!(h.transport.dispatched(), 0);
    assert_eq!(h.manager.get_performance_summary().failed_requests, 2);
}

#[tokio::test]
async fn post_is_not_retried_on_server_error() {
    let transport = ScriptedTransport::with_script(vec![Ok(response(500, "boom"))]);
    let h = harness(transport, 2);

    let error = request_error(assert_err!(post(&h, RequestOptions::default()).await));
    assert_eq!(error.attempts, 1);
    assert_eq!(h.transport.dispatched(), 1);
}

#[tokio::test]
async fn post_retries_when_allowed() {
    let transport = ScriptedTransport::with_script(vec![Ok(response(500, "boom"))]);
    let h = harness(transport, 2);

    let options = RequestOptions {
        allow_retry: true,
        ..RequestOptions::default()
    };
    assert_ok!(post(&h, options).await);
    assert_eq!(h.transport.dispatched(), 2);
    assert_eq!(
        h.transport.seen.lock()[0].body.as_deref(),
        Some(r#"{"qty":1,"symbol":"BTCUSDT"}"#)
    );
}

#[tokio::test]
async fn rate_limited_post_is_retried_after_the_server_delay() {
    let transport = ScriptedTransport::with_script(vec![Ok(rate_limited("0"))]);
    let h = harness(transport, 2);

    assert_ok!(post(&h, RequestOptions::default()).await);
    assert_eq!(h.transport.dispatched(), 2);

    let summary = h.manager.get_performance_summary();
    assert_eq!(summary.rate_limit_hits, 1);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.successful_requests, 1);
}

#[tokio::test]
async fn long_server_delay_is_capped_by_the_policy() {
    let transport = ScriptedTransport::with_script(vec![Ok(rate_limited("3600"))]);
    let h = harness(transport, 2);

    let result = tokio::time::timeout(Duration::from_secs(2), get(&h, "/v1/ticker")).await;
    assert_ok!(assert_ok!(result));
    assert_eq!(h.transport.dispatched(), 2);
    assert_eq!(h.limiter.stats().released, 1);
}

#[tokio::test]
async fn terminal_rate_limit_carries_retry_after() {
    let transport = ScriptedTransport::with_script(vec![
        Ok(rate_limited("0")),
        Ok(rate_limited("0")),
        Ok(rate_limited("7")),
    ]);
    let h = harness(transport, 2);

    let error = request_error(assert_err!(get(&h, "/v1/ticker").await));
    assert_eq!(error.kind, ErrorKind::RateLimited);
    assert_eq!(error.retry_after, Some(Duration::from_secs(7)));
    assert_eq!(error.attempts, 3);
}

#[tokio::test]
async fn private_calls_are_signed_on_every_attempt() {
    let transport = ScriptedTransport::with_script(vec![Ok(response(503, "busy"))]);
    let h = harness(transport, 2);

    assert_ok!(get(&h, "/private/account").await);
    assert_eq!(h.signer.signatures.load(Ordering::SeqCst), 2);
    let seen = h.transport.seen.lock().clone();
    assert!(seen.iter().all(|r| r.headers.contains_key("x-timestamp")));

    assert_ok!(get(&h, "/v1/time").await);
    assert_eq!(h.signer.signatures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_failures_are_classified_and_retried() {
    let transport = ScriptedTransport::with_script(vec![Err(TransportError::Connection(
        "connection refused".to_string(),
    ))]);
    let h = harness(transport, 2);

    assert_ok!(get(&h, "/v1/time").await);
    assert_eq!(h.transport.dispatched(), 2);
    assert_eq!(h.manager.get_performance_summary().retries, 1);
}

#[tokio::test]
async fn invalid_requests_are_not_retried() {
    let transport = ScriptedTransport::with_script(vec![Err(TransportError::InvalidRequest(
        "bad url".to_string(),
    ))]);
    let h = harness(transport, 2);

    let error = request_error(assert_err!(get(&h, "/v1/time").await));
    assert_eq!(error.kind, ErrorKind::ClientError);
    assert_eq!(h.transport.dispatched(), 1);
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    server_time: u64,
}

#[tokio::test]
async fn request_decodes_json() {
    let transport =
        ScriptedTransport::with_script(vec![Ok(response(200, r#"{"server_time":1700000000}"#))]);
    let h = harness(transport, 2);

    let time: ServerTime = assert_ok!(
        h.manager
            .request(
                HttpMethod::Get,
                "/v1/time",
                &RequestParams::new(),
                None,
                &Headers::new()
            )
            .await
    );
    assert_eq!(time.server_time, 1_700_000_000);
}

#[tokio::test]
async fn request_reports_undecodable_bodies() {
    let transport = ScriptedTransport::with_script(vec![Ok(response(200, "<html>"))]);
    let h = harness(transport, 2);

    let result: TransportResult<ServerTime> = h
        .manager
        .request(
            HttpMethod::Get,
            "/v1/time",
            &RequestParams::new(),
            None,
            &Headers::new(),
        )
        .await;
    let error = assert_err!(result);
    assert_eq!(error.kind(), ErrorKind::ParseError);
}

#[tokio::test]
async fn reset_clears_the_summary() {
    let h = harness(ScriptedTransport::with_script(Vec::new()), 2);
    assert_ok!(get(&h, "/v1/time").await);
    assert_eq!(h.manager.get_performance_summary().total_requests, 1);

    h.manager.reset_metrics();
    let summary = h.manager.get_performance_summary();
    assert_eq!(summary.total_requests, 0);
    assert_eq!(summary.successful_requests, 0);
}
