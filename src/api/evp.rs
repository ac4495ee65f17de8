use axum::http::HeaderMap;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use super::{bad_request, check_auth, ApiError, AppState, ErrorResponse};
use crate::evp::EvpRequest;

#[derive(Debug, Deserialize, ToSchema)]
pub struct EvpStartRequest {
    /// Approach lane the emergency vehicle is on
    pub lane: String,
    /// Estimated seconds until arrival at the stop line
    pub eta_seconds: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EvpResponse {
    /// Whether a preemption request is active after this call
    pub active: bool,
    /// Identifier of the active request, if any
    pub request_id: Option<String>,
    pub lane: Option<String>,
    pub expected_arrival: Option<String>,
}

/// Activate emergency vehicle preemption for a lane. A second call
/// replaces the active request; the scheduler picks up the new ETA on
/// its next poll.
#[utoipa::path(
    post,
    path = "/api/evp/start",
    request_body = EvpStartRequest,
    responses(
        (status = 200, description = "Preemption activated", body = EvpResponse),
        (status = 400, description = "Unknown lane or ETA out of range", body = ErrorResponse),
        (status = 401, description = "Missing or invalid auth token", body = ErrorResponse)
    ),
    tag = "evp"
)]
pub async fn start_evp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvpStartRequest>,
) -> Result<Json<EvpResponse>, ApiError> {
    check_auth(&state, &headers)?;

    let (min_eta, max_eta) = (
        state.evp_config.min_eta_secs,
        state.evp_config.max_eta_secs,
    );
    if request.eta_seconds < min_eta || request.eta_seconds > max_eta {
        return Err(bad_request(format!(
            "eta_seconds must be between {min_eta} and {max_eta}"
        )));
    }

    let mut guard = state.shared.write().await;
    if guard.topology.group_of(&request.lane).is_none() {
        return Err(bad_request(format!("unknown lane '{}'", request.lane)));
    }

    let evp = EvpRequest::new(request.lane, request.eta_seconds, Utc::now());
    info!(
        id = %evp.id,
        lane = %evp.lane,
        eta_seconds = evp.eta_seconds,
        "Emergency preemption activated"
    );
    let response = EvpResponse {
        active: true,
        request_id: Some(evp.id.to_string()),
        lane: Some(evp.lane.clone()),
        expected_arrival: Some(evp.expected_arrival.to_rfc3339()),
    };
    guard.evp = Some(evp);
    Ok(Json(response))
}

/// Clear the active preemption request. Idempotent: clearing when
/// nothing is active succeeds with `active: false`.
#[utoipa::path(
    post,
    path = "/api/evp/clear",
    responses(
        (status = 200, description = "Preemption cleared", body = EvpResponse),
        (status = 401, description = "Missing or invalid auth token", body = ErrorResponse)
    ),
    tag = "evp"
)]
pub async fn clear_evp(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EvpResponse>, ApiError> {
    check_auth(&state, &headers)?;

    let mut guard = state.shared.write().await;
    if let Some(evp) = guard.evp.take() {
        info!(id = %evp.id, lane = %evp.lane, "Emergency preemption cleared");
    }
    Ok(Json(EvpResponse {
        active: false,
        request_id: None,
        lane: None,
        expected_arrival: None,
    }))
}
