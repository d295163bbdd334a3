//! Device trust and anomaly detection for a gateway.
//!
//! ```text
//!     client ──▶ http (extractors, rate limit) ──▶ trust::TrustEngine
//!                                                    │
//!              ┌──────────────┬──────────────┬──────┴───────┬──────────────┐
//!              ▼              ▼              ▼              ▼              ▼
//!            geo           store          detect        security::ban    events
//!        (enrichment)  (device records) (pure rules)   (fail2ban)     (audit log)
//! ```
//!
//! Cross-cutting: `config` (TOML + hot reload), `observability` (tracing,
//! Prometheus metrics), `resilience` (deadlines, one retry), `lifecycle`
//! (signals, graceful shutdown).

pub mod admin;
pub mod clock;
pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod events;
pub mod geo;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;
pub mod trust;

pub use config::TrustConfig;
pub use error::{EngineError, EngineResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use trust::TrustEngine;
