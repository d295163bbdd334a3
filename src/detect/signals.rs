//! Detection outcomes.

use std::fmt;
use std::net::IpAddr;

use crate::events::Severity;

/// A single rule that fired, in rule-precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Resolved country is outside the geofence.
    GeoViolation { country: String },
    /// The user would hold more concurrently authorized devices than allowed.
    DeviceLimitExceeded { authorized: usize, max: usize },
    /// The device's fingerprint changed within the session window.
    IdentityChurn { fields: Vec<&'static str> },
    /// The source address is serving a ban.
    SourceBanned { ip: IpAddr },
    /// First sighting of this device for a user who already has others.
    NewDeviceForKnownUser { user_id: String },
}

impl Signal {
    pub fn severity(&self) -> Severity {
        match self {
            Signal::GeoViolation { .. } | Signal::SourceBanned { .. } => Severity::High,
            Signal::DeviceLimitExceeded { .. } | Signal::IdentityChurn { .. } => Severity::Medium,
            Signal::NewDeviceForKnownUser { .. } => Severity::Info,
        }
    }

    /// Whether the signal makes the request suspicious.
    pub fn is_suspicious(&self) -> bool {
        !matches!(self, Signal::NewDeviceForKnownUser { .. })
    }

    /// Whether the signal may move the stored trust state. A ban denies the
    /// request but says nothing about the device itself.
    pub fn affects_state(&self) -> bool {
        matches!(
            self,
            Signal::GeoViolation { .. }
                | Signal::DeviceLimitExceeded { .. }
                | Signal::IdentityChurn { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::GeoViolation { .. } => "geo_violation",
            Signal::DeviceLimitExceeded { .. } => "device_limit",
            Signal::IdentityChurn { .. } => "identity_churn",
            Signal::SourceBanned { .. } => "source_banned",
            Signal::NewDeviceForKnownUser { .. } => "new_device",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::GeoViolation { country } => {
                write!(f, "geo violation: country {country} is not permitted")
            }
            Signal::DeviceLimitExceeded { authorized, max } => write!(
                f,
                "device limit exceeded: {authorized} concurrently authorized devices (max {max})"
            ),
            Signal::IdentityChurn { fields } => write!(
                f,
                "identity churn: {} changed within the session window",
                fields.join(", ")
            ),
            Signal::SourceBanned { ip } => write!(f, "source {ip} is banned"),
            Signal::NewDeviceForKnownUser { user_id } => write!(f, "new device for user {user_id}"),
        }
    }
}

/// Everything the detector concluded about one device/request pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub is_suspicious: bool,
    /// Severity of the first firing rule, `Info` when nothing fired.
    pub severity: Severity,
    pub signals: Vec<Signal>,
    /// Deny this request whatever the trust state says.
    pub auto_deny: bool,
}

impl DetectionResult {
    pub fn clean() -> Self {
        Self::from_signals(Vec::new())
    }

    /// Build from signals already in precedence order.
    pub fn from_signals(signals: Vec<Signal>) -> Self {
        Self {
            is_suspicious: signals.iter().any(Signal::is_suspicious),
            severity: signals.first().map_or(Severity::Info, Signal::severity),
            auto_deny: signals
                .iter()
                .any(|s| matches!(s, Signal::SourceBanned { .. })),
            signals,
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.signals.iter().map(ToString::to_string).collect()
    }

    /// Severity of the first signal that may move trust state, if any.
    pub fn state_severity(&self) -> Option<Severity> {
        self.signals
            .iter()
            .find(|s| s.affects_state())
            .map(Signal::severity)
    }

    pub fn geo_violation(&self) -> Option<&str> {
        self.signals.iter().find_map(|s| match s {
            Signal::GeoViolation { country } => Some(country.as_str()),
            _ => None,
        })
    }

    pub fn notify_new_device(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, Signal::NewDeviceForKnownUser { .. }))
    }
}
