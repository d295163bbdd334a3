//! Device and security-event endpoints.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::device::{DeviceInfo, DeviceRecord, HeartbeatRequest, TrustState};
use crate::events::{SecurityEvent, SecurityReport};
use crate::http::request::{user_agent, ApiJson, ClientIp, EventsQuery, Operator};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::trust::Decision;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub status: &'static str,
    pub device_id: String,
    pub authorized: bool,
    pub trust_state: TrustState,
    pub flagged: bool,
    pub reasons: Vec<String>,
}

impl DecisionResponse {
    fn from_decision(decision: Decision, status: &'static str) -> Self {
        Self {
            status,
            authorized: decision.authorized(),
            flagged: decision.flagged(),
            device_id: decision.device_id,
            trust_state: decision.trust_state,
            reasons: decision.reasons,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub status: &'static str,
    pub device_id: String,
    pub trust_state: TrustState,
}

impl From<DeviceRecord> for StateResponse {
    fn from(record: DeviceRecord) -> Self {
        Self {
            status: "success",
            device_id: record.device_id,
            trust_state: record.trust_state,
        }
    }
}

/// `POST /api/device/register`
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    ApiJson(info): ApiJson<DeviceInfo>,
) -> Result<Response, ApiError> {
    let registration = info
        .validate(user_agent(&headers))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let decision = state.engine.register_device(registration, ip).await?;

    Ok(if decision.degraded {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(DecisionResponse::from_decision(decision, "degraded")),
        )
            .into_response()
    } else {
        Json(DecisionResponse::from_decision(decision, "success")).into_response()
    })
}

/// `POST /api/device/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    ApiJson(request): ApiJson<HeartbeatRequest>,
) -> Result<Response, ApiError> {
    let heartbeat = request
        .validate(user_agent(&headers))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let decision = state.engine.heartbeat(heartbeat, ip).await?;

    let (code, status) = if decision.degraded {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else if decision.authorized() {
        (StatusCode::OK, "success")
    } else {
        (StatusCode::FORBIDDEN, "denied")
    };
    Ok((code, Json(DecisionResponse::from_decision(decision, status))).into_response())
}

/// `GET /api/device/{id}`
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceRecord>, ApiError> {
    Ok(Json(state.engine.get_device(&device_id).await?))
}

/// `POST /api/device/{id}/authorize`
pub async fn authorize(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Operator(operator): Operator,
    Path(device_id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    let record = state.engine.authorize(&device_id, &operator, ip).await?;
    Ok(Json(record.into()))
}

/// `POST /api/device/{id}/block`
pub async fn block(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Operator(operator): Operator,
    Path(device_id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    let record = state.engine.block(&device_id, &operator, ip).await?;
    Ok(Json(record.into()))
}

/// `POST /api/security/log`
pub async fn log_security_event(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(report): ApiJson<SecurityReport>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event = state.engine.log_security_event(report, ip).await?;
    Ok(Json(json!({ "status": "success", "eventId": event.id })))
}

/// `GET /api/security/events`
pub async fn list_security_events(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<Vec<SecurityEvent>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (filter, limit) = query.into_filter()?;
    Ok(Json(state.engine.list_security_events(&filter, limit).await?))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
