//! Shared fixtures: an in-process fake shortener and in-memory targets.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shortload_core::request::Method;
use shortload_core::{
    KeyPools, RequestError, RequestMixer, RequestSpec, Scenario, ScenarioWeights, TargetClient,
    TargetResponse, TargetSettings, Workload,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Initialize tracing for tests (call once)
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("shortload_core=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// How the fake shortener behaves.
#[derive(Debug, Clone, Copy)]
pub enum ServerMode {
    /// 302 for lookups, 201 for shortens.
    Healthy,
    /// 500 for everything.
    Broken,
    /// Healthy, but lookups take this long.
    SlowLookups(Duration),
}

#[derive(Default)]
pub struct ServerCounters {
    pub lookups: AtomicU64,
    pub shortens: AtomicU64,
    pub bad_payloads: AtomicU64,
}

struct ServerState {
    mode: ServerMode,
    counters: Arc<ServerCounters>,
}

pub struct FakeShortener {
    pub addr: SocketAddr,
    pub counters: Arc<ServerCounters>,
}

impl FakeShortener {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Serve a fake shortener on an ephemeral port.
///
/// Hot keys answer `X-Cache-Hit: true`, warm keys `false`, cold keys carry no
/// marker at all.
pub async fn spawn_shortener(mode: ServerMode) -> FakeShortener {
    let counters = Arc::new(ServerCounters::default());
    let state = Arc::new(ServerState {
        mode,
        counters: Arc::clone(&counters),
    });

    let app = Router::new()
        .route("/api/shorten", post(shorten))
        .route("/:key", get(redirect))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeShortener { addr, counters }
}

async fn redirect(State(state): State<Arc<ServerState>>, Path(key): Path<String>) -> Response {
    state.counters.lookups.fetch_add(1, Ordering::Relaxed);
    match state.mode {
        ServerMode::Broken => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        ServerMode::SlowLookups(delay) => tokio::time::sleep(delay).await,
        ServerMode::Healthy => {}
    }

    let mut response = (
        StatusCode::FOUND,
        [(header::LOCATION, "https://example.com/destination")],
    )
        .into_response();

    let marker = if key.starts_with("hot_") {
        Some("true")
    } else if key.starts_with("warm_") {
        Some("false")
    } else {
        None
    };
    if let Some(value) = marker {
        response
            .headers_mut()
            .insert("x-cache-hit", HeaderValue::from_static(value));
    }
    response
}

async fn shorten(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let ServerMode::Broken = state.mode {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let valid = body["url"]
        .as_str()
        .is_some_and(|url| url.starts_with("https://example.com/page/"));
    if !valid {
        state.counters.bad_payloads.fetch_add(1, Ordering::Relaxed);
        return StatusCode::BAD_REQUEST.into_response();
    }

    let n = state.counters.shortens.fetch_add(1, Ordering::Relaxed);
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "short_code": format!("s{:06}", n) })),
    )
        .into_response()
}

/// In-memory target that answers after a fixed (virtual) delay.
pub struct FixedLatencyTarget {
    pub latency: Duration,
    /// Answer every request with this status instead of a success.
    pub status_override: Option<u16>,
    pub calls: AtomicU64,
}

impl FixedLatencyTarget {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            status_override: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn failing(latency: Duration, status: u16) -> Self {
        Self {
            status_override: Some(status),
            ..Self::new(latency)
        }
    }
}

#[async_trait]
impl TargetClient for FixedLatencyTarget {
    async fn execute(&self, request: &RequestSpec) -> Result<TargetResponse, RequestError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let status = self.status_override.unwrap_or(match request.method {
            Method::Get => 302,
            Method::Post => 201,
        });
        let cache_hit = match request.scenario {
            Scenario::Write => None,
            scenario => Some(scenario == Scenario::Hot),
        };

        Ok(TargetResponse {
            status,
            cache_hit,
            elapsed: self.latency,
        })
    }
}

/// Reference mix with small pools.
pub fn workload(base_url: &str, read_ratio: f64) -> Workload {
    Workload::new(
        RequestMixer::new(read_ratio, ScenarioWeights::tiered(0.3, 0.5, 0.2).unwrap()).unwrap(),
        KeyPools::new(100, 1_000, 10_000).unwrap(),
        TargetSettings {
            base_url: base_url.to_string(),
            shorten_path: "/api/shorten".to_string(),
            url_prefix: "https://example.com/page".to_string(),
            redirect_timeout: Duration::from_secs(5),
            shorten_timeout: Duration::from_secs(10),
        },
    )
    .unwrap()
}
