//! Outbound HTTP calls to backends.
//!
//! # Responsibilities
//! - Issue a GET with a deadline and buffer the response body
//! - Classify transport failures (connection refused vs. everything else)
//!
//! The `Upstream` trait is the seam between the dispatch/probe logic and the
//! network, so both can run against a scripted upstream in tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use hyper::body::Bytes;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use url::Url;

/// Upper bound on a buffered upstream body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A completed upstream round trip.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Why an upstream call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The backend actively refused the TCP connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a server error.
    #[error("upstream returned {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Request(String),
}

impl UpstreamError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, UpstreamError::ConnectionRefused(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::ConnectionRefused(_) => "connection_refused",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Status(_) => "status",
            UpstreamError::Request(_) => "request",
        }
    }
}

/// HTTP client used for forwarding and probing.
pub trait Upstream: Send + Sync + 'static {
    /// GET `url`, failing if no complete response arrives within `timeout`.
    fn get(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}

/// `Upstream` backed by the hyper-util legacy client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl Upstream for HyperUpstream {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<UpstreamResponse, UpstreamError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(header::USER_AGENT, "lb-proxy")
            .body(Body::empty())
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let round_trip = async {
            let response = self.client.request(request).await.map_err(|e| classify(&e))?;
            let status = response.status();
            let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_BODY_BYTES)
                .await
                .map_err(|e| UpstreamError::Request(e.to_string()))?;
            Ok(UpstreamResponse { status, body })
        };

        match time::timeout(timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout)),
        }
    }
}

/// Walk the error chain looking for a refused connection.
fn classify(err: &hyper_util::client::legacy::Error) -> UpstreamError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return UpstreamError::ConnectionRefused(io.to_string());
            }
        }
        source = e.source();
    }
    UpstreamError::Request(err.to_string())
}
