//! Request/Response Model
//!
//! Types passed between the request execution manager, its strategies, and
//! the HTTP transport.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Query or form parameters, ordered for deterministic signing.
pub type RequestParams = BTreeMap<String, String>;

/// Header map, ordered for deterministic signing.
pub type Headers = BTreeMap<String, String>;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
    /// HEAD
    Head,
}

impl HttpMethod {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
        }
    }

    /// Whether repeating the call has no additional effect.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        !matches!(self, Self::Post | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters of one exchange's REST surface.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// TCP/TLS connect bound.
    pub connect_timeout: Duration,
    /// Per-attempt response bound.
    pub read_timeout: Duration,
    /// Idle keep-alive connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Idle connection lifetime.
    pub pool_idle_timeout: Duration,
    /// TCP keep-alive interval.
    pub tcp_keepalive: Duration,
    /// Concurrent in-flight requests per host.
    pub max_concurrent_per_host: usize,
    /// User-Agent header.
    pub user_agent: String,
}

impl RequestContext {
    /// Context for `base_url` with default pool and timeout values.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Duration::from_secs(60),
            max_concurrent_per_host: 64,
            user_agent: concat!("exchange-transport/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Absolute URL for `endpoint`.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

/// Material produced by signing a request.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationData {
    /// Headers to add.
    pub headers: Headers,
    /// Query parameters to append.
    pub query: Vec<(String, String)>,
    /// Replacement body, for exchanges that sign into the body.
    pub body: Option<String>,
}

/// Rate limit parameters of one exchange.
#[derive(Debug, Clone)]
pub struct RateLimitContext {
    /// Sustained request rate.
    pub requests_per_second: f64,
    /// Requests admitted back to back; also the concurrency cap.
    pub burst_capacity: u32,
    /// Per-endpoint weights; unlisted endpoints weigh 1.
    pub endpoint_weights: HashMap<String, u32>,
    /// Bound on waiting for admission.
    pub acquire_timeout: Duration,
}

impl Default for RateLimitContext {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_capacity: 10,
            endpoint_weights: HashMap::new(),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Latency and retry budgets of an exchange integration.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceTargets {
    /// Per-request latency target.
    pub max_latency: Duration,
    /// Upper bound for any retry policy used with this integration.
    pub max_retry_attempts: u32,
    /// Connect budget.
    pub connect_timeout: Duration,
    /// Read budget.
    pub read_timeout: Duration,
    /// Target sustained throughput, requests per second.
    pub target_throughput: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_millis(50),
            max_retry_attempts: 5,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            target_throughput: 100.0,
        }
    }
}

/// A request ready to be signed and dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Headers.
    pub headers: Headers,
    /// Serialized body.
    pub body: Option<String>,
}

impl PreparedRequest {
    /// Create a request with no query, headers, or body.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Merge signing output into the request.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthenticationData) -> Self {
        self.headers.extend(auth.headers);
        self.query.extend(auth.query);
        if auth.body.is_some() {
            self.body = auth.body;
        }
        self
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers, keys lower-cased.
    pub headers: Headers,
    /// Body text.
    pub body: String,
    /// Time from dispatch to full body.
    pub latency: Duration,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Per-call overrides for `execute`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Allow retries of a non-idempotent method on any retryable failure.
    pub allow_retry: bool,
    /// Per-attempt timeout overriding the context's read timeout.
    pub timeout: Option<Duration>,
}
