//! Local HTTP target used by integration tests and demos.
//!
//! Routes:
//! - `GET /health` returns `{"status":"ok"}`.
//! - `GET /delay/{ms}` sleeps `ms` (0..=10000) before answering.
//! - `GET /random-delay` sleeps a random 0..=1000 ms.
//! - `GET /error-rate/{pct}` answers 500 with probability `pct`% (0..=100).
//! - `GET /status/{code}` answers with the given status code.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng as _;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_DELAY: &str = "/delay/{ms}";
pub const PATH_RANDOM_DELAY: &str = "/random-delay";
pub const PATH_ERROR_RATE: &str = "/error-rate/{pct}";
pub const PATH_STATUS: &str = "/status/{code}";

const MAX_DELAY_MS: u64 = 10_000;
const MAX_RANDOM_DELAY_MS: u64 = 1_000;
const MAX_ERROR_RATE: u8 = 100;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    errors_served: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_errors_served(&self) {
        self.errors_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Responses with a 5xx status, whichever route produced them.
    pub fn errors_served(&self) -> u64 {
        self.errors_served.load(Ordering::Relaxed)
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_ms: u128,
}

#[derive(Debug, Serialize)]
struct DelayResponse {
    delay_ms: u64,
    timestamp_ms: u128,
}

#[derive(Debug, Serialize)]
struct ErrorRateResponse {
    success: bool,
    error_rate_percent: u8,
    random_value: u8,
    timestamp_ms: u128,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn bad_request(msg: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg })).into_response()
}

async fn handle_health(State(stats): State<TestServerStats>) -> Json<HealthResponse> {
    stats.inc_requests_total();
    Json(HealthResponse {
        status: "ok",
        timestamp_ms: unix_millis(),
    })
}

async fn handle_delay(State(stats): State<TestServerStats>, Path(ms): Path<String>) -> Response {
    stats.inc_requests_total();

    let Some(ms) = ms.parse::<u64>().ok().filter(|ms| *ms <= MAX_DELAY_MS) else {
        return bad_request("invalid delay value (0-10000ms)");
    };
    sleep(Duration::from_millis(ms)).await;

    Json(DelayResponse {
        delay_ms: ms,
        timestamp_ms: unix_millis(),
    })
    .into_response()
}

async fn handle_random_delay(State(stats): State<TestServerStats>) -> Json<DelayResponse> {
    stats.inc_requests_total();

    let ms = rand::thread_rng().gen_range(0..=MAX_RANDOM_DELAY_MS);
    sleep(Duration::from_millis(ms)).await;

    Json(DelayResponse {
        delay_ms: ms,
        timestamp_ms: unix_millis(),
    })
}

async fn handle_error_rate(
    State(stats): State<TestServerStats>,
    Path(pct): Path<String>,
) -> Response {
    stats.inc_requests_total();

    let Some(pct) = pct.parse::<u8>().ok().filter(|p| *p <= MAX_ERROR_RATE) else {
        return bad_request("invalid error rate (0-100)");
    };

    let random_value = rand::thread_rng().gen_range(0..100u8);
    let should_error = random_value < pct;
    let body = Json(ErrorRateResponse {
        success: !should_error,
        error_rate_percent: pct,
        random_value,
        timestamp_ms: unix_millis(),
    });

    if should_error {
        stats.inc_errors_served();
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    } else {
        body.into_response()
    }
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<String>) -> Response {
    stats.inc_requests_total();

    let Some(status) = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
    else {
        return bad_request("invalid status code");
    };
    if status.is_server_error() {
        stats.inc_errors_served();
    }

    (status, status.as_str().to_string()).into_response()
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_DELAY, get(handle_delay))
        .route(PATH_RANDOM_DELAY, get(handle_random_delay))
        .route(PATH_ERROR_RATE, get(handle_error_rate))
        .route(PATH_STATUS, get(handle_status))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
