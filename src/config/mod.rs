//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TrustConfig (validated, immutable)
//!     → PolicyConfig::from_config → shared via ArcSwap with the engine
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps TrustConfig and PolicyConfig atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Layers built at startup (body limit, timeouts, headers) are not
//!   reloaded; policy, throttling, proxies and admin key are

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{
    AdminConfig, DeviceTrackingConfig, EventsConfig, Fail2BanConfig, GeoFencingConfig,
    GeoProvider, GeolocationConfig, ListenerConfig, LogFormat, ObservabilityConfig, PolicyConfig,
    RateLimitConfig, RetryConfig, SecurityConfig, StaticGeoEntry, SuspiciousActivityConfig,
    TimeoutConfig, TrustConfig,
};
