use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

use super::{internal_error, ApiError, AppState, ErrorResponse};
use crate::state::StateSnapshot;

/// Current intersection state: phase, countdowns, counts, timings and
/// any active preemption.
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Current intersection state", body = StateSnapshot)
    ),
    tag = "status"
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StateSnapshot> {
    let snapshot = state.shared.read().await.snapshot(Utc::now());
    Json(snapshot)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Completed signal cycles recorded since the log began
    pub cycles_logged: i64,
    /// Mean vehicles present per completed cycle
    pub avg_vehicles_per_cycle: f64,
    /// Mean percent improvement over the fixed-cycle baseline
    pub avg_efficiency_improvement: f64,
    /// Cycles completed while a preemption request was active
    pub evp_cycles: i64,
}

#[derive(Debug, FromRow)]
struct StatsRow {
    cycles_logged: i64,
    avg_vehicles: Option<f64>,
    avg_efficiency: Option<f64>,
    evp_cycles: Option<i64>,
}

/// Aggregates over the persisted cycle log.
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Cycle log aggregates", body = StatsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "status"
)]
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let row: StatsRow = sqlx::query_as(
        "SELECT COUNT(*) AS cycles_logged, \
                AVG(total_vehicles) AS avg_vehicles, \
                AVG(efficiency_improvement) AS avg_efficiency, \
                SUM(CASE WHEN evp_active THEN 1 ELSE 0 END) AS evp_cycles \
         FROM cycle_log",
    )
    .fetch_one(&state.pool)
    .await
    .map_err(|e| internal_error(format!("Failed to query cycle log: {e}")))?;

    Ok(Json(StatsResponse {
        cycles_logged: row.cycles_logged,
        avg_vehicles_per_cycle: row.avg_vehicles.unwrap_or(0.0),
        avg_efficiency_improvement: row.avg_efficiency.unwrap_or(0.0),
        evp_cycles: row.evp_cycles.unwrap_or(0),
    }))
}
