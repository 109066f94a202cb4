use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_HAND_PROBABILITY: &str = "/hand/probability";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_STATUS: &str = "/status/{code}";

pub const SLOW_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    saw_json_content_type: Arc<AtomicU64>,
    bad_requests: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_saw_json_content_type(&self) {
        self.saw_json_content_type.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_bad_requests(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn saw_json_content_type(&self) -> u64 {
        self.saw_json_content_type.load(Ordering::Relaxed)
    }

    pub fn bad_requests(&self) -> u64 {
        self.bad_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub health: String,
    pub hand_probability: String,
    pub slow: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            health: format!("{base_url}{PATH_HEALTH}"),
            hand_probability: format!("{base_url}{PATH_HAND_PROBABILITY}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct ProbabilityRequest {
    hole: Vec<String>,
    #[serde(default)]
    community: Vec<String>,
    #[serde(default)]
    num_players: u32,
    #[serde(default)]
    simulations: u32,
}

#[derive(Debug, Serialize)]
struct ProbabilityResponse {
    win_probability: f64,
    tie_probability: f64,
    loss_probability: f64,
    simulations: u32,
}

const SUITS: &str = "HSCD";
const RANKS: &str = "23456789TJQKA";

/// Cards are suit first: `HA` is the ace of hearts.
fn rank(card: &str) -> Option<char> {
    let mut chars = card.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(suit), Some(rank), None) if SUITS.contains(suit) && RANKS.contains(rank) => {
            Some(rank)
        }
        _ => None,
    }
}

fn validate(req: &ProbabilityRequest) -> Result<(), &'static str> {
    if !matches!(req.community.len(), 0 | 3 | 4 | 5) {
        return Err("community must be 0,3,4,5");
    }
    if req.hole.len() != 2 {
        return Err("must have exactly 2 hole cards");
    }
    if !req.hole.iter().chain(&req.community).all(|c| rank(c).is_some()) {
        return Err("invalid cards");
    }
    let mut seen = HashSet::new();
    if !req.hole.iter().chain(&req.community).all(|c| seen.insert(c)) {
        return Err("duplicate card error");
    }
    Ok(())
}

/// Deterministic stand-in for a Monte Carlo equity estimate: a pocket pair wins more
/// often, every extra opponent dilutes the odds.
fn estimate(req: &ProbabilityRequest) -> ProbabilityResponse {
    let players = req.num_players.max(2);
    let pair = rank(&req.hole[0]) == rank(&req.hole[1]);
    let base = if pair { 0.85 } else { 0.55 };
    let win = base / f64::from(players - 1).sqrt();
    let tie = 0.02;
    ProbabilityResponse {
        win_probability: win,
        tie_probability: tie,
        loss_probability: (1.0 - win - tie).max(0.0),
        simulations: if req.simulations == 0 {
            10_000
        } else {
            req.simulations
        },
    }
}

async fn handle_health(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn handle_hand_probability(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], Bytes) {
    stats.inc_requests_total();

    if headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/json"))
    {
        stats.inc_saw_json_content_type();
    }

    let bad = |msg: &'static str| {
        stats.inc_bad_requests();
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            Bytes::from_static(msg.as_bytes()),
        )
    };

    let req: ProbabilityRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return bad("bad json"),
    };
    if let Err(msg) = validate(&req) {
        return bad(msg);
    }

    match serde_json::to_vec(&estimate(&req)) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            Bytes::from(bytes),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            Bytes::from_static(b"encode error"),
        ),
    }
}

async fn handle_slow(State(stats): State<TestServerStats>) -> &'static str {
    stats.inc_requests_total();
    sleep(SLOW_DELAY).await;
    "slow"
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
) -> StatusCode {
    stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_HAND_PROBABILITY, post(handle_hand_probability))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    urls: TestServerUrls,
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

        let base_url = format!("http://{addr}");
        let urls = TestServerUrls::new(base_url.clone());

        Ok(Self {
            addr,
            base_url,
            urls,
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

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
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
