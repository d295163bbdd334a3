use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AdminConfig;
use crate::http::{ApiError, AppState};

fn bearer_matches(headers: &HeaderMap, admin: &AdminConfig) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {}", admin.api_key))
}

/// Guards `/admin/*`. Hidden entirely while the admin surface is disabled.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load_full();
    if !config.admin.enabled {
        return ApiError::NotFound("not found".into()).into_response();
    }
    if !bearer_matches(request.headers(), &config.admin) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorAccess {
    Granted,
    Hidden,
    Unauthorized,
}

fn operator_access(headers: &HeaderMap, admin: &AdminConfig) -> OperatorAccess {
    if admin.enabled {
        if bearer_matches(headers, admin) {
            OperatorAccess::Granted
        } else {
            OperatorAccess::Unauthorized
        }
    } else if admin.open_operator_routes {
        OperatorAccess::Granted
    } else {
        OperatorAccess::Hidden
    }
}

/// Guards operator authorize/block. The admin key is required while the
/// admin surface is enabled; otherwise the routes answer 404 unless
/// `open_operator_routes` is set.
pub async fn require_operator(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let access = {
        let config = state.config.load();
        operator_access(request.headers(), &config.admin)
    };
    match access {
        OperatorAccess::Granted => next.run(request).await,
        OperatorAccess::Hidden => ApiError::NotFound("not found".into()).into_response(),
        OperatorAccess::Unauthorized => {
            tracing::warn!(path = %request.uri().path(), "operator request without valid credentials");
            ApiError::Unauthorized.into_response()
        }
    }
}
