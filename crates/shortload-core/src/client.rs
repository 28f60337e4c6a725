//! Target client: issues a [`RequestSpec`] and reports what came back

use crate::error::RequestError;
use crate::request::{Method, RequestSpec};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};
use tracing::trace;

/// Default response header carrying the cache marker.
pub const DEFAULT_CACHE_HEADER: &str = "X-Cache-Hit";

/// What the target answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetResponse {
    pub status: u16,
    /// `Some(true)` when the cache header read `true`, `Some(false)` for any other
    /// value, `None` when the header was absent.
    pub cache_hit: Option<bool>,
    /// Time from send until the body was fully received.
    pub elapsed: Duration,
}

/// Seam between virtual users and the network.
///
/// Implementations report transport failures and timeouts as [`RequestError`];
/// any HTTP status is returned as a [`TargetResponse`] and judged by the caller.
#[async_trait]
pub trait TargetClient: Send + Sync {
    async fn execute(&self, request: &RequestSpec) -> Result<TargetResponse, RequestError>;
}

/// reqwest-backed client. Never follows redirects: a 301/302 is the measured result.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: reqwest::Client,
    cache_header: String,
}

impl HttpTarget {
    pub fn new(cache_header: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(concat!("shortload/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            cache_header: cache_header.into(),
        })
    }

    fn parse_cache_marker(&self, headers: &reqwest::header::HeaderMap) -> Option<bool> {
        let value = headers.get(self.cache_header.as_str())?;
        Some(
            value
                .to_str()
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        )
    }
}

#[async_trait]
impl TargetClient for HttpTarget {
    async fn execute(&self, request: &RequestSpec) -> Result<TargetResponse, RequestError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone()),
            None => builder,
        };

        let start = Instant::now();
        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify(e, start.elapsed()))?;

        let status = response.status().as_u16();
        let cache_hit = self.parse_cache_marker(response.headers());

        // Drain the body so latency covers the whole exchange.
        response
            .bytes()
            .await
            .map_err(|e| classify(e, start.elapsed()))?;
        let elapsed = start.elapsed();

        trace!(url = %request.url, status, ?cache_hit, ?elapsed, "request complete");

        Ok(TargetResponse {
            status,
            cache_hit,
            elapsed,
        })
    }
}

fn classify(error: reqwest::Error, elapsed: Duration) -> RequestError {
    if error.is_timeout() {
        RequestError::Timeout { elapsed }
    } else {
        RequestError::Transport {
            message: error.to_string(),
            elapsed,
        }
    }
}
