use axum::http::HeaderMap;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use utoipa::ToSchema;

use super::{bad_request, check_auth, ApiError, AppState, ErrorResponse};

/// Upper bound on a single lane count. Far above any physical queue;
/// keeps downstream timing arithmetic well away from integer limits.
pub const MAX_LANE_COUNT: u32 = 10_000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CountsRequest {
    /// Smoothed vehicle count per lane. Lanes not named keep their
    /// previous count.
    pub counts: HashMap<String, u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountsResponse {
    /// Full lane count table after the update
    pub counts: HashMap<String, u32>,
    pub total_vehicles: u32,
}

/// Ingest lane counts from the perception pipeline. Unknown lane names
/// or out-of-range counts reject the whole request; nothing is
/// partially applied.
#[utoipa::path(
    post,
    path = "/api/counts",
    request_body = CountsRequest,
    responses(
        (status = 200, description = "Counts applied", body = CountsResponse),
        (status = 400, description = "Unknown lane name or count out of range", body = ErrorResponse),
        (status = 401, description = "Missing or invalid auth token", body = ErrorResponse)
    ),
    tag = "counts"
)]
pub async fn post_counts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CountsRequest>,
) -> Result<Json<CountsResponse>, ApiError> {
    check_auth(&state, &headers)?;

    let mut guard = state.shared.write().await;
    for (lane, count) in &request.counts {
        if guard.topology.group_of(lane).is_none() {
            return Err(bad_request(format!("unknown lane '{lane}'")));
        }
        if *count > MAX_LANE_COUNT {
            return Err(bad_request(format!(
                "count for lane '{lane}' exceeds the maximum of {MAX_LANE_COUNT}"
            )));
        }
    }
    for (lane, count) in &request.counts {
        guard.counts.insert(lane.clone(), *count);
    }
    let totals = guard.group_counts();
    let counts = guard.counts.clone();
    drop(guard);

    debug!(lanes = request.counts.len(), total = totals.total(), "Lane counts updated");
    Ok(Json(CountsResponse {
        counts,
        total_vehicles: totals.total(),
    }))
}
