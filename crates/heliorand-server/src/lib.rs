//! HTTP dispenser — a thin translator between HTTP consumers and the pool.
//!
//! All consumer routes live under `/api/v1`. The server holds no entropy
//! state of its own: every request goes straight to the shared
//! [`EntropyPool`] and pool errors map onto HTTP statuses (`bad_request` →
//! 400, empty/partial/store-down → 503).

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tokio::sync::watch;

use heliorand_core::{EntropyPool, PoolError, PoolHealth, PoolStats};

/// Default byte count for the bare `/random` route.
const DEFAULT_RANDOM_BYTES: usize = 256;

/// Shared server state.
struct AppState {
    pool: Arc<EntropyPool>,
}

#[derive(Debug, Serialize)]
struct RandomResponse {
    /// Base64-encoded random bytes.
    bytes: String,
    length: usize,
    format: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Serialize)]
struct StatsResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: PoolStats,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    pool: PoolHealth,
}

fn dispense_error(err: PoolError) -> (StatusCode, ErrorResponse) {
    let status = match err {
        PoolError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        PoolError::Empty | PoolError::NotEnough { .. } | PoolError::Store(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    let detail = match &err {
        PoolError::Empty | PoolError::NotEnough { .. } => {
            "Entropy pool is empty. Please try again later.".to_string()
        }
        PoolError::Store(inner) => format!("Entropy service unavailable: {inner}"),
        PoolError::BadRequest { .. } => err.to_string(),
    };
    (status, ErrorResponse { detail })
}

async fn handle_random_n(
    State(state): State<Arc<AppState>>,
    Path(n): Path<usize>,
) -> Result<Json<RandomResponse>, (StatusCode, Json<ErrorResponse>)> {
    if n == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                detail: "requested byte count must be at least 1".to_string(),
            }),
        ));
    }
    match state.pool.take(n).await {
        Ok(bytes) => Ok(Json(RandomResponse {
            bytes: BASE64.encode(&bytes),
            length: bytes.len(),
            format: "base64",
        })),
        Err(err) => {
            log::warn!("dispense of {n} bytes failed: {err}");
            let (status, body) = dispense_error(err);
            Err((status, Json(body)))
        }
    }
}

async fn handle_random_default(
    state: State<Arc<AppState>>,
) -> Result<Json<RandomResponse>, (StatusCode, Json<ErrorResponse>)> {
    handle_random_n(state, Path(DEFAULT_RANDOM_BYTES)).await
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.pool.stats().await {
        Ok(stats) => Json(
            serde_json::to_value(StatsResponse {
                status: "connected",
                stats,
            })
            .unwrap_or_default(),
        ),
        Err(err) => Json(serde_json::json!({
            "status": "disconnected",
            "error": err.to_string(),
        })),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.pool.health().await;
    Json(HealthResponse {
        status: if pool.healthy { "healthy" } else { "degraded" },
        service: "heliorand",
        version: heliorand_core::VERSION,
        pool,
    })
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "heliorand",
        "version": heliorand_core::VERSION,
        "description": "Randomness as a service from full-disk solar imagery",
        "api_base": "/api/v1",
        "endpoints": {
            "/api/v1/random/{n}": "Take n random bytes, 1-10240 (base64 encoded)",
            "/api/v1/random": "Take 256 random bytes",
            "/api/v1/stats": "Entropy pool statistics",
            "/api/v1/health": "Health check",
        },
    }))
}

async fn handle_ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ping": "pong"}))
}

/// Build the axum router.
pub fn build_router(pool: Arc<EntropyPool>) -> Router {
    let state = Arc::new(AppState { pool });

    Router::new()
        .route("/", get(handle_index))
        .route("/ping", get(handle_ping))
        .route("/api/v1/random", get(handle_random_default))
        .route("/api/v1/random/{n}", get(handle_random_n))
        .route("/api/v1/stats", get(handle_stats))
        .route("/api/v1/health", get(handle_health))
        .with_state(state)
}

/// Run the HTTP dispenser until the shutdown channel fires.
pub async fn run_server(
    pool: Arc<EntropyPool>,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = build_router(pool);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("dispenser listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
