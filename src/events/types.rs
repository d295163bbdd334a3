//! Security event types.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of security-relevant occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SuspiciousDevice,
    AnomalyDetected,
    DeviceAuthorized,
    DeviceBlocked,
    GeoViolation,
    RateLimitExceeded,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SuspiciousDevice => "suspicious_device",
            EventType::AnomalyDetected => "anomaly_detected",
            EventType::DeviceAuthorized => "device_authorized",
            EventType::DeviceBlocked => "device_blocked",
            EventType::GeoViolation => "geo_violation",
            EventType::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative importance, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity `{other}`")),
        }
    }
}

/// A recorded, immutable security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// Process-local sequence number.
    pub id: u64,
    pub event_type: EventType,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(rename = "sourceIP")]
    pub source_ip: IpAddr,
    pub severity: Severity,
    pub details: String,
    /// Server-assigned, strictly increasing.
    pub timestamp: DateTime<Utc>,
}

/// An event about to be appended. The log assigns `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSecurityEvent {
    pub event_type: EventType,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub source_ip: IpAddr,
    pub severity: Severity,
    pub details: String,
}

impl NewSecurityEvent {
    pub fn new(event_type: EventType, severity: Severity, source_ip: IpAddr) -> Self {
        Self {
            event_type,
            device_id: None,
            user_id: None,
            source_ip,
            severity,
            details: String::new(),
        }
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Query predicate. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    /// Minimum severity, inclusive.
    pub min_severity: Option<Severity>,
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(id) = &self.device_id {
            if event.device_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(user) = &self.user_id {
            if event.user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if self.min_severity.is_some_and(|min| event.severity < min) {
            return false;
        }
        if self.event_type.is_some_and(|t| event.event_type != t) {
            return false;
        }
        if self.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        true
    }
}
