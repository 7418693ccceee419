//! Main axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET /consume`  - Take one unit of stock under the distributed lock
//! - `GET /count`    - Consume requests served by this process
//! - `GET /healthz`  - Health check
//! - `GET /metrics`  - Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, instrument, warn};

use crate::coordination::LockError;
use crate::inventory::ConsumeOutcome;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/consume", get(handle_consume))
        .route("/count", get(handle_count))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ConsumeResponse {
    #[serde(flatten)]
    outcome: ConsumeOutcome,
    port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /consume`
///
/// Blocks until the distributed lock is held (or the configured acquire
/// timeout passes), then decrements the shared stock.
#[instrument(skip(state))]
async fn handle_consume(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let outcome = state.inventory.consume().await?;
    let body = ConsumeResponse {
        outcome,
        port: state.config.server.port(),
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// `GET /count`
async fn handle_count(State(state): State<Arc<AppState>>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.inventory.requests_served(),
    })
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        redis: state.redis.clone(),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the service.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The lock could not be obtained in time; the caller may retry.
    Unavailable(String),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unavailable(msg) => {
                warn!(%msg, "request rejected");
                (StatusCode::SERVICE_UNAVAILABLE, msg).into_response()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<LockError>() {
            Some(lock_err @ (LockError::Timeout { .. } | LockError::Cancelled { .. })) => {
                AppError::Unavailable(lock_err.to_string())
            }
            _ => AppError::Internal(err),
        }
    }
}
