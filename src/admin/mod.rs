pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::require_admin;
use self::handlers::*;
use crate::http::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}
