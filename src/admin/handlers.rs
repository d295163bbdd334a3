use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::{ApiError, AppState};
use crate::trust::EngineStats;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub tracking_enabled: bool,
    pub block_suspicious: bool,
    pub geofencing_enabled: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let policy = state.engine.policy();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        tracking_enabled: policy.tracking_enabled,
        block_suspicious: policy.block_suspicious,
        geofencing_enabled: policy.geo_fencing.enabled,
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<EngineStats>, ApiError> {
    Ok(Json(state.engine.stats().await?))
}
