pub mod counts;
pub mod evp;
pub mod status;
pub mod ws;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::{OpenApi, ToSchema};

use crate::config::EvpConfig;
use crate::publisher::SnapshotSender;
use crate::state::{EvpSnapshot, SharedState, StateSnapshot};

/// Header carrying the shared secret for mutating endpoints.
pub const AUTH_HEADER: &str = "x-auth-token";

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub pool: SqlitePool,
    pub snapshots: SnapshotSender,
    pub evp_config: EvpConfig,
    /// Shared secret for mutating endpoints; `None` trusts all callers.
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Verify the shared secret on a mutating request. A missing or wrong
/// token is rejected; with no token configured every caller is trusted.
pub fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(());
    };
    let presented = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if presented == Some(expected) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing or invalid auth token".to_string(),
            }),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status::get_status))
        .route("/api/stats", get(status::get_stats))
        .route("/api/counts", post(counts::post_counts))
        .route("/api/evp/start", post(evp::start_evp))
        .route("/api/evp/clear", post(evp::clear_evp))
        .route("/api/ws", get(ws::ws_status))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        status::get_status,
        status::get_stats,
        counts::post_counts,
        evp::start_evp,
        evp::clear_evp,
    ),
    components(schemas(
        StateSnapshot,
        EvpSnapshot,
        ErrorResponse,
        counts::CountsRequest,
        counts::CountsResponse,
        evp::EvpStartRequest,
        evp::EvpResponse,
        status::StatsResponse,
    )),
    tags(
        (name = "status", description = "Live intersection state"),
        (name = "counts", description = "Perception lane count ingest"),
        (name = "evp", description = "Emergency vehicle preemption"),
    )
)]
pub struct ApiDoc;
