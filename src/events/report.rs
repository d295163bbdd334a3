//! Client-reported security events (`POST /api/security/log`).

use std::net::IpAddr;

use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::device::{validate_device_id, ValidationError};
use crate::events::types::{EventType, NewSecurityEvent, Severity};

const MAX_DETAILS_LEN: usize = 1024;

/// Body accepted from clients. Source address and timestamp are always
/// assigned by the server; the client-sent values are accepted and dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecurityReport {
    #[serde(rename = "type", alias = "eventType")]
    pub event_type: EventType,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub ip_address: Option<IgnoredAny>,
    #[serde(default)]
    pub timestamp: Option<IgnoredAny>,
}

impl SecurityReport {
    /// Only detection-class events may come from clients; authorization and
    /// throttling events are reserved for the server.
    pub fn validate(self, source_ip: IpAddr) -> Result<NewSecurityEvent, ValidationError> {
        if !matches!(
            self.event_type,
            EventType::SuspiciousDevice | EventType::AnomalyDetected
        ) {
            return Err(ValidationError::Malformed {
                field: "type",
                reason: format!("`{}` cannot be reported by clients", self.event_type),
            });
        }
        if let Some(id) = &self.device_id {
            validate_device_id(id)?;
        }
        let details = self.details.unwrap_or_default();
        if details.chars().count() > MAX_DETAILS_LEN {
            return Err(ValidationError::TooLong {
                field: "details",
                max: MAX_DETAILS_LEN,
            });
        }

        let mut event = NewSecurityEvent::new(
            self.event_type,
            self.severity.unwrap_or(Severity::Warning),
            source_ip,
        )
        .user(self.user_id)
        .details(details);
        event.device_id = self.device_id;
        Ok(event)
    }
}
