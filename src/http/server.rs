//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every device, security and admin route
//! - Wire up middleware (request id, tracing, timeout, body limit,
//!   rate limiting, security headers, request metrics)
//! - Apply configuration reloads to the live engine
//! - Sweep expired ban counters and idle rate-limit buckets
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    map_request_body::MapRequestBodyLayer,
    map_response_body::MapResponseBodyLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{self, auth::require_operator};
use crate::clock::SystemClock;
use crate::config::{PolicyConfig, TrustConfig};
use crate::geo::{build_resolver, GeoError};
use crate::http::handlers;
use crate::observability::{metrics, tracing::request_span};
use crate::security::{rate_limit_middleware, security_header_layers, RateLimiter};
use crate::trust::{Collaborators, TrustEngine};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const BUCKET_IDLE: Duration = Duration::from_secs(600);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TrustEngine>,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<ArcSwap<TrustConfig>>,
}

/// HTTP front end for the trust engine.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: TrustConfig, collaborators: Collaborators) -> Self {
        if !config.admin.enabled && config.admin.open_operator_routes {
            tracing::warn!(
                "operator authorize/block routes are open without authentication; \
                 enable the admin surface to require a key"
            );
        }
        let engine = Arc::new(TrustEngine::from_config(&config, collaborators));
        let state = AppState {
            engine,
            limiter: Arc::new(RateLimiter::new()),
            config: Arc::new(ArcSwap::from_pointee(config)),
        };
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Wall clock, in-memory store and log, resolver from configuration.
    pub fn from_config(config: TrustConfig) -> Result<Self, GeoError> {
        let geo = build_resolver(&config.geolocation, config.timeouts.geolocation())?;
        let collaborators = Collaborators::in_memory(Arc::new(SystemClock)).with_geo(geo);
        Ok(Self::new(config, collaborators))
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.load_full();

        let operator_routes = Router::new()
            .route("/api/device/{id}/authorize", post(handlers::authorize))
            .route("/api/device/{id}/block", post(handlers::block))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_operator));

        let api = Router::new()
            .route("/api/device/register", post(handlers::register))
            .route("/api/device/heartbeat", post(handlers::heartbeat))
            .route("/api/device/{id}", get(handlers::get_device))
            .route("/api/security/log", post(handlers::log_security_event))
            .route("/api/security/events", get(handlers::list_security_events))
            .merge(operator_routes)
            .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

        let mut app = Router::new()
            .route("/health", get(handlers::health))
            .merge(api)
            .merge(admin::setup_admin_router(state.clone()));

        if config.security.enable_headers {
            for layer in security_header_layers() {
                app = app.layer(layer);
            }
        }

        // Outermost first: the id is assigned before the span opens.
        app.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span::<Body>))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                .layer(MapResponseBodyLayer::new(Body::new))
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                .layer(MapRequestBodyLayer::new(Body::new))
                .layer(middleware::from_fn(track_requests)),
        )
        .with_state(state)
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Validated configurations arriving on `config_updates` replace the
    /// live policy; listener and timeout settings need a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<TrustConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                state.engine.replace_policy(PolicyConfig::from_config(&config));
                state.config.store(Arc::new(config));
                tracing::info!("configuration reloaded");
            }
        });

        let state = self.state.clone();
        let mut stop = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let bans = state.engine.purge_expired_bans();
                        let buckets = state.limiter.purge_idle(BUCKET_IDLE);
                        if bans + buckets > 0 {
                            tracing::debug!(bans, buckets, "expired counters purged");
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn engine(&self) -> Arc<TrustEngine> {
        self.state.engine.clone()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> Arc<TrustConfig> {
        self.state.config.load_full()
    }
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
