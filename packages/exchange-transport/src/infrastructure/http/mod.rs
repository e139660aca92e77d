//! Pooled HTTP Transport
//!
//! [`HttpTransport`] over a single `reqwest::Client`: keep-alive pool, TCP
//! keep-alive and `TCP_NODELAY`, with a semaphore capping in-flight requests
//! per host. One transport serves one exchange's REST surface.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::sync::Semaphore;

use crate::application::ports::HttpTransport;
use crate::domain::error::{TransportError, TransportResult};
use crate::domain::request::{Headers, HttpMethod, HttpResponse, PreparedRequest, RequestContext};

/// HTTP transport backed by a pooled `reqwest` client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    host_slots: Semaphore,
}

impl ReqwestTransport {
    /// Build the pooled client from `context`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] if the client cannot be built.
    pub fn new(context: &RequestContext) -> TransportResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(context.pool_max_idle_per_host)
            .pool_idle_timeout(context.pool_idle_timeout)
            .tcp_keepalive(context.tcp_keepalive)
            .tcp_nodelay(true)
            .connect_timeout(context.connect_timeout)
            .user_agent(context.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host_slots: Semaphore::new(context.max_concurrent_per_host.max(1)),
        })
    }

    /// Requests that can start without waiting for a host slot.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.host_slots.available_permits()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: PreparedRequest,
        timeout: Duration,
    ) -> TransportResult<HttpResponse> {
        let started = Instant::now();
        let _slot = tokio::time::timeout(timeout, self.host_slots.acquire())
            .await
            .map_err(|_| TransportError::timeout("http host slot", timeout))?
            .map_err(|_| TransportError::Shutdown)?;

        let mut builder = self
            .client
            .request(to_method(request.method), &request.url)
            .timeout(timeout.saturating_sub(started.elapsed()));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            latency: started.elapsed(),
        })
    }
}

const fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Head => Method::HEAD,
    }
}

fn map_reqwest_error(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout("http request", timeout)
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_default_context() {
        let transport = ReqwestTransport::new(&RequestContext::new("https://api.example.test"));
        assert!(transport.is_ok());
        assert_eq!(transport.unwrap().available_slots(), 64);
    }

    #[test]
    fn method_mapping() {
        assert_eq!(to_method(HttpMethod::Get), Method::GET);
        assert_eq!(to_method(HttpMethod::Patch), Method::PATCH);
    }
}
