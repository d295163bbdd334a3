//! Request extractors.
//!
//! # Responsibilities
//! - Decode JSON bodies with field-level errors mapped to 400
//! - Attribute each request to a client address (trusted proxies honored)
//! - Parse the security-event query string
//!
//! # Design Decisions
//! - Bodies are decoded from raw bytes so oversize bodies surface as 413
//!   and every other decode failure as a uniform JSON 400

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};

use crate::events::{EventFilter, EventType, Severity};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::client_ip;

pub const X_OPERATOR: &str = "x-operator";
const DEFAULT_OPERATOR: &str = "operator";
const MAX_OPERATOR_LEN: usize = 64;

/// JSON body extractor with JSON error responses.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge
            } else {
                ApiError::BadRequest(rejection.body_text())
            }
        })?;
        serde_json::from_slice(&bytes)
            .map(ApiJson)
            .map_err(|e| ApiError::BadRequest(format!("malformed body: {e}")))
    }
}

/// The address the request is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ConnectInfo(peer) = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .copied()
            .ok_or_else(|| ApiError::Internal("connection info unavailable".into()))?;
        let config = state.config.load();
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            &config.security.trusted_proxies,
        )))
    }
}

/// Who performed an operator action (`x-operator` header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(X_OPERATOR) else {
            return Ok(Operator(DEFAULT_OPERATOR.into()));
        };
        let name = value
            .to_str()
            .map(str::trim)
            .map_err(|_| ApiError::BadRequest("x-operator must be ASCII".into()))?;
        if name.is_empty() || name.len() > MAX_OPERATOR_LEN {
            return Err(ApiError::BadRequest(format!(
                "x-operator must be 1..={MAX_OPERATOR_LEN} characters"
            )));
        }
        Ok(Operator(name.to_string()))
    }
}

pub fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())
}

/// `GET /api/security/events` query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    /// Minimum severity.
    pub severity: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub since: Option<DateTime<Utc>>,
}

impl EventsQuery {
    pub fn into_filter(self) -> Result<(EventFilter, Option<usize>), ApiError> {
        let min_severity = self
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let filter = EventFilter {
            device_id: self.device_id.filter(|s| !s.is_empty()),
            user_id: self.user_id.filter(|s| !s.is_empty()),
            min_severity,
            event_type: self.event_type,
            since: self.since,
        };
        Ok((filter, self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<EventsQuery, String> {
        axum::extract::Query::<EventsQuery>::try_from_uri(
            &format!("/api/security/events?{query}").parse().unwrap(),
        )
        .map(|q| q.0)
        .map_err(|e| e.body_text())
    }

    #[test]
    fn events_query_builds_filter() {
        let query = parse("limit=5&deviceId=d1&severity=HIGH&type=geo_violation").unwrap();
        let (filter, limit) = query.into_filter().unwrap();
        assert_eq!(limit, Some(5));
        assert_eq!(filter.device_id.as_deref(), Some("d1"));
        assert_eq!(filter.min_severity, Some(Severity::High));
        assert_eq!(filter.event_type, Some(EventType::GeoViolation));
    }

    #[test]
    fn non_numeric_limit_is_rejected() {
        assert!(parse("limit=lots").is_err());
        assert!(parse("limit=-1").is_err());
    }

    #[test]
    fn unknown_severity_is_rejected() {
        let query = parse("severity=apocalyptic").unwrap();
        assert!(matches!(query.into_filter(), Err(ApiError::BadRequest(_))));
    }
}
