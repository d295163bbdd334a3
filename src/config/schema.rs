//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the trust
//! gateway. All types derive Serde traits for deserialization from TOML.
//! Section and key names follow the deployment YAML the service replaced
//! (`security.fail2ban`, `device_tracking.suspicious_activity`, ...).

use std::net::IpAddr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Upper bound for any policy duration, so `chrono::Duration` construction
/// can never overflow. Validation rejects larger values with a message.
pub const MAX_POLICY_SECS: u64 = 10 * 365 * 24 * 3600;

/// Root configuration for the trust gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TrustConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Deadlines for the request and for every collaborator call.
    pub timeouts: TimeoutConfig,

    /// Retry settings applied at adapter boundaries.
    pub retries: RetryConfig,

    /// Per-IP request throttling.
    pub rate_limit: RateLimitConfig,

    /// HTTP hardening, session and fail2ban settings.
    pub security: SecurityConfig,

    /// Device tracking and anomaly policy.
    pub device_tracking: DeviceTrackingConfig,

    /// Geolocation resolver selection.
    pub geolocation: GeolocationConfig,

    /// Security event query bounds.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin / operator surface.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds.
    pub request_secs: u64,

    /// Deadline for a single device store call in milliseconds.
    pub store_ms: u64,

    /// Deadline for a single event log call in milliseconds.
    pub event_log_ms: u64,

    /// Deadline for geolocation enrichment in milliseconds.
    pub geolocation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 10,
            store_ms: 500,
            event_log_ms: 500,
            geolocation_ms: 250,
        }
    }
}

impl TimeoutConfig {
    pub fn store(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_ms)
    }

    pub fn event_log(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.event_log_ms)
    }

    pub fn geolocation(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.geolocation_ms)
    }
}

/// Retry configuration for store and log adapters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry a transient failure once.
    pub enabled: bool,

    /// Base delay for the backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on the backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 25,
            max_delay_ms: 200,
        }
    }
}

/// Per-IP request throttling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable throttling.
    pub enabled: bool,

    /// Sustained requests per second per client IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 20,
            burst_size: 40,
        }
    }
}

/// Security hardening, session and ban configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add security response headers.
    pub enable_headers: bool,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Peers allowed to set `X-Forwarded-For`.
    pub trusted_proxies: Vec<IpAddr>,

    /// Session window in seconds (identity churn and concurrent devices).
    pub session_timeout: u64,

    /// How far ahead of server time a heartbeat timestamp may be.
    pub heartbeat_max_skew_secs: u64,

    /// Repeated-offense banning.
    pub fail2ban: Fail2BanConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 64 * 1024,
            trusted_proxies: Vec::new(),
            session_timeout: 3600,
            heartbeat_max_skew_secs: 300,
            fail2ban: Fail2BanConfig::default(),
        }
    }
}

/// Fail2ban-style banning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Fail2BanConfig {
    pub enabled: bool,

    /// Failures within the window that trigger a ban.
    pub max_retry: u32,

    /// Sliding window length in seconds.
    pub find_time: u64,

    /// Ban duration in seconds.
    pub ban_time: u64,
}

impl Default for Fail2BanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry: 5,
            find_time: 600,
            ban_time: 3600,
        }
    }
}

impl Fail2BanConfig {
    pub fn window(&self) -> Duration {
        policy_duration(self.find_time)
    }

    pub fn ban_duration(&self) -> Duration {
        policy_duration(self.ban_time)
    }
}

/// Device tracking section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceTrackingConfig {
    /// When disabled only the ban rule is evaluated.
    pub enabled: bool,

    pub suspicious_activity: SuspiciousActivityConfig,
}

impl Default for DeviceTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suspicious_activity: SuspiciousActivityConfig::default(),
        }
    }
}

/// Anomaly policy knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SuspiciousActivityConfig {
    /// Concurrently authorized devices allowed per user (0 = unlimited).
    pub max_devices_per_user: usize,

    #[serde(rename = "notify_on_new_device")]
    pub notify_on_new: bool,

    /// Hard-block on high/critical detections.
    #[serde(rename = "block_suspicious_ips")]
    pub block_suspicious: bool,

    pub geo_fencing: GeoFencingConfig,
}

impl Default for SuspiciousActivityConfig {
    fn default() -> Self {
        Self {
            max_devices_per_user: 5,
            notify_on_new: true,
            block_suspicious: false,
            geo_fencing: GeoFencingConfig::default(),
        }
    }
}

/// Country allow/block lists (ISO 3166-1 alpha-2, case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoFencingConfig {
    pub enabled: bool,
    pub allowed_countries: Vec<String>,
    pub blocked_countries: Vec<String>,
}

impl GeoFencingConfig {
    /// Whether `country` violates the fence. Disabled fences never fire.
    pub fn violates(&self, country: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let listed = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(country));
        listed(&self.blocked_countries)
            || (!self.allowed_countries.is_empty() && !listed(&self.allowed_countries))
    }
}

/// Which geolocation resolver to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoProvider {
    #[default]
    None,
    Static,
    Http,
}

/// Geolocation resolver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub provider: GeoProvider,

    /// URL template for the `http` provider; `{ip}` is substituted.
    pub endpoint: String,

    /// Fixed table for the `static` provider.
    pub static_entries: Vec<StaticGeoEntry>,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            provider: GeoProvider::None,
            endpoint: "https://ipapi.co/{ip}/json/".to_string(),
            static_entries: Vec::new(),
        }
    }
}

/// One row of the static geolocation table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticGeoEntry {
    pub ip: IpAddr,
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

/// Bounds for security event queries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Limit used when the caller gives none (or zero).
    pub default_limit: usize,

    /// Hard ceiling applied to every query.
    pub max_limit: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

impl EventsConfig {
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.default_limit.min(self.max_limit),
            Some(n) => n.min(self.max_limit),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin and operator surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount `/admin/*` and require the key on operator routes.
    pub enabled: bool,

    /// Bearer token.
    pub api_key: String,

    /// Serve authorize/block without a key while the admin surface is
    /// disabled. Off by default: the operator routes are then not mounted.
    pub open_operator_routes: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            open_operator_routes: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// The read-only policy consumed by the detector, the state machine and the
/// ban counter. Built once from [`TrustConfig`]; a reload builds a new one
/// and swaps it in whole.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub tracking_enabled: bool,
    pub session_timeout: Duration,
    pub heartbeat_max_skew: Duration,
    pub max_devices_per_user: usize,
    pub notify_on_new_device: bool,
    pub block_suspicious: bool,
    pub geo_fencing: GeoFencingConfig,
    pub fail2ban: Fail2BanConfig,
    pub events: EventsConfig,
}

impl PolicyConfig {
    pub fn from_config(config: &TrustConfig) -> Self {
        let suspicious = &config.device_tracking.suspicious_activity;
        Self {
            tracking_enabled: config.device_tracking.enabled,
            session_timeout: policy_duration(config.security.session_timeout),
            heartbeat_max_skew: policy_duration(config.security.heartbeat_max_skew_secs),
            max_devices_per_user: suspicious.max_devices_per_user,
            notify_on_new_device: suspicious.notify_on_new,
            block_suspicious: suspicious.block_suspicious,
            geo_fencing: suspicious.geo_fencing.clone(),
            fail2ban: config.security.fail2ban.clone(),
            events: config.events.clone(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::from_config(&TrustConfig::default())
    }
}

fn policy_duration(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_POLICY_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: TrustConfig = toml::from_str("[listener]\nbind_address = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.security.fail2ban.max_retry, 5);
        assert_eq!(config.events.default_limit, 100);
    }

    #[test]
    fn original_key_names_are_accepted() {
        let raw = r#"
            [device_tracking.suspicious_activity]
            max_devices_per_user = 2
            notify_on_new_device = false
            block_suspicious_ips = true

            [device_tracking.suspicious_activity.geo_fencing]
            enabled = true
            blocked_countries = ["KP"]
        "#;
        let config: TrustConfig = toml::from_str(raw).unwrap();
        let policy = PolicyConfig::from_config(&config);
        assert_eq!(policy.max_devices_per_user, 2);
        assert!(!policy.notify_on_new_device);
        assert!(policy.block_suspicious);
        assert!(policy.geo_fencing.violates("kp"));
    }

    #[test]
    fn geo_fence_rules() {
        let fence = GeoFencingConfig {
            enabled: true,
            allowed_countries: vec!["US".into(), "CA".into()],
            blocked_countries: vec!["KP".into()],
        };
        assert!(fence.violates("KP"));
        assert!(fence.violates("FR"));
        assert!(!fence.violates("us"));

        let disabled = GeoFencingConfig { enabled: false, ..fence };
        assert!(!disabled.violates("KP"));
    }

    #[test]
    fn event_limit_clamping() {
        let events = EventsConfig::default();
        assert_eq!(events.clamp(None), 100);
        assert_eq!(events.clamp(Some(0)), 100);
        assert_eq!(events.clamp(Some(25)), 25);
        assert_eq!(events.clamp(Some(50_000)), 1000);
    }
}
