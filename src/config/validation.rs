//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds >= 1)
//! - Validate addresses, country codes and the resolver endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&TrustConfig -> Result<(), Vec<ValidationError>>`
//! - Runs before a config (initial or reloaded) is accepted

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GeoProvider, TrustConfig, MAX_POLICY_SECS};
use crate::events::MAX_QUERY_LIMIT;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &TrustConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.request_secs", timeouts.request_secs),
        ("timeouts.store_ms", timeouts.store_ms),
        ("timeouts.event_log_ms", timeouts.event_log_ms),
        ("timeouts.geolocation_ms", timeouts.geolocation_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.rate_limit.enabled
        && (config.rate_limit.requests_per_second == 0 || config.rate_limit.burst_size == 0)
    {
        errors.push(ValidationError::new(
            "rate_limit",
            "requests_per_second and burst_size must be positive when enabled",
        ));
    }

    let security = &config.security;
    if security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than zero"));
    }
    check_policy_secs(&mut errors, "security.session_timeout", security.session_timeout);
    if security.heartbeat_max_skew_secs > MAX_POLICY_SECS {
        errors.push(ValidationError::new(
            "security.heartbeat_max_skew_secs",
            format!("must be at most {MAX_POLICY_SECS}"),
        ));
    }

    let fail2ban = &security.fail2ban;
    if fail2ban.enabled {
        if fail2ban.max_retry == 0 {
            errors.push(ValidationError::new("security.fail2ban.max_retry", "must be at least 1"));
        }
        check_policy_secs(&mut errors, "security.fail2ban.find_time", fail2ban.find_time);
        check_policy_secs(&mut errors, "security.fail2ban.ban_time", fail2ban.ban_time);
    }

    let fence = &config.device_tracking.suspicious_activity.geo_fencing;
    for code in fence.allowed_countries.iter().chain(&fence.blocked_countries) {
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push(ValidationError::new(
                "device_tracking.suspicious_activity.geo_fencing",
                format!("`{code}` is not an ISO 3166-1 alpha-2 country code"),
            ));
        }
    }
    if let Some(code) = fence
        .blocked_countries
        .iter()
        .find(|b| fence.allowed_countries.iter().any(|a| a.eq_ignore_ascii_case(b)))
    {
        errors.push(ValidationError::new(
            "device_tracking.suspicious_activity.geo_fencing",
            format!("`{code}` is both allowed and blocked"),
        ));
    }

    let geo = &config.geolocation;
    if geo.provider == GeoProvider::Http {
        if !geo.endpoint.contains("{ip}") {
            errors.push(ValidationError::new(
                "geolocation.endpoint",
                "must contain the `{ip}` placeholder",
            ));
        } else if url::Url::parse(&geo.endpoint.replace("{ip}", "127.0.0.1")).is_err() {
            errors.push(ValidationError::new("geolocation.endpoint", "is not a valid URL"));
        }
    }
    if geo.provider == GeoProvider::Static && geo.static_entries.is_empty() {
        errors.push(ValidationError::new(
            "geolocation.static_entries",
            "static provider needs at least one entry",
        ));
    }

    let events = &config.events;
    if events.max_limit == 0 || events.max_limit > MAX_QUERY_LIMIT {
        errors.push(ValidationError::new(
            "events.max_limit",
            format!("must be between 1 and {MAX_QUERY_LIMIT}"),
        ));
    }
    if events.default_limit == 0 || events.default_limit > events.max_limit {
        errors.push(ValidationError::new(
            "events.default_limit",
            "must be between 1 and events.max_limit",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    let admin = &config.admin;
    if admin.enabled && (admin.api_key.is_empty() || admin.api_key == "CHANGE_ME_IN_PRODUCTION") {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be set to a real secret when the admin surface is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy_secs(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 || value > MAX_POLICY_SECS {
        errors.push(ValidationError::new(
            field,
            format!("must be between 1 and {MAX_POLICY_SECS} seconds"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&TrustConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = TrustConfig::default();
        config.listener.bind_address = "nope".into();
        config.security.fail2ban.max_retry = 0;
        config.events.default_limit = 5000;
        config
            .device_tracking
            .suspicious_activity
            .geo_fencing
            .blocked_countries = vec!["KPX".into()];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"security.fail2ban.max_retry"));
        assert!(fields.contains(&"events.default_limit"));
        assert!(fields.contains(&"device_tracking.suspicious_activity.geo_fencing"));
    }

    #[test]
    fn admin_requires_a_real_key() {
        let mut config = TrustConfig::default();
        config.admin.enabled = true;
        assert!(validate_config(&config).is_err());

        config.admin.api_key = "s3cret-operator-key".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn conflicting_country_lists_are_rejected() {
        let mut config = TrustConfig::default();
        let fence = &mut config.device_tracking.suspicious_activity.geo_fencing;
        fence.allowed_countries = vec!["us".into()];
        fence.blocked_countries = vec!["US".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn http_provider_needs_placeholder() {
        let mut config = TrustConfig::default();
        config.geolocation.provider = GeoProvider::Http;
        config.geolocation.endpoint = "https://geo.example/lookup".into();
        assert!(validate_config(&config).is_err());
    }
}
