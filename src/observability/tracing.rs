//! Request spans.
//!
//! Every request span carries the `x-request-id` assigned at the edge, so
//! engine log lines can be joined to access logs.

use axum::http::Request;
use tracing::Span;

pub const X_REQUEST_ID: &str = "x-request-id";

/// `make_span_with` hook for `TraceLayer`.
pub fn request_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
