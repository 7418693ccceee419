use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use fred::interfaces::ClientLike;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub redis: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Subset of `AppState` required by the health-check handler.
#[derive(Clone)]
pub struct HealthState {
    pub redis: fred::clients::Pool,
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

async fn check_redis(pool: &fred::clients::Pool) -> CheckResult {
    match pool.ping::<String>(None).await {
        Ok(_) => CheckResult::healthy(),
        Err(e) => CheckResult::unhealthy(format!("PING failed: {e}")),
    }
}

/// The lock cannot work without its store, so a failed store check makes
/// the whole service unhealthy.
fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    if checks.redis.ok {
        HealthStatus::Ok
    } else {
        HealthStatus::Unhealthy
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Returns 200 when healthy, 503 otherwise.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let checks = HealthChecks {
        redis: check_redis(&state.redis).await,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}
