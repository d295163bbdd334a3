//! Device identity types.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization lifecycle stage of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    /// Known to the registry but never evaluated to completion.
    Unknown,
    /// Detector flagged the device; waiting for an operator.
    PendingReview,
    /// Admitted.
    Authorized,
    /// Denied. Only an operator can lift it.
    Blocked,
}

impl TrustState {
    pub const ALL: [TrustState; 4] = [
        TrustState::Unknown,
        TrustState::PendingReview,
        TrustState::Authorized,
        TrustState::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrustState::Unknown => "unknown",
            TrustState::PendingReview => "pending_review",
            TrustState::Authorized => "authorized",
            TrustState::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused the current trust state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Actor {
    System,
    Operator(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Operator(name) => write!(f, "operator:{name}"),
        }
    }
}

/// Coarse server-resolved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// ISO 3166-1 alpha-2, upper-case.
    pub country: String,
    pub city: String,
}

/// Client-reported network characteristics. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionProfile {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlink_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_data: Option<bool>,
}

/// Screen geometry as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScreenResolution {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f64>,
}

/// Client-asserted coordinates. Geofencing never uses them; the server
/// resolves location from the source address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportedPosition {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Environment details a client volunteers at registration. Kept for
/// operators; no rule reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Minutes behind UTC, as `Date.getTimezoneOffset` reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_not_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webgl_renderer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_available: Option<bool>,
    /// Body user agent, when it differs from the `User-Agent` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_position: Option<ReportedPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
}

impl ClientAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The client-asserted attributes used to approximate device identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub user_agent: String,
    pub platform: String,
    pub vendor: String,
}

/// A persisted device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
    #[serde(rename = "lastKnownIP")]
    pub last_known_ip: IpAddr,
    pub location: Option<Location>,
    #[serde(rename = "connectionProfile")]
    pub connection: Option<ConnectionProfile>,
    #[serde(default, skip_serializing_if = "ClientAttributes::is_empty")]
    pub attributes: ClientAttributes,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trust_state: TrustState,
    pub authorized_by: Option<Actor>,
    /// Bumped on every trust-state write; the compare-and-swap key.
    pub state_version: u64,
}

impl DeviceRecord {
    pub fn country(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.country.as_str())
    }
}

/// Fresh device information observed on a registration, ready to be merged
/// into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub user_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub ip: IpAddr,
    pub location: Option<Location>,
    pub connection: Option<ConnectionProfile>,
    pub attributes: ClientAttributes,
    pub seen_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Record for a device seen for the first time.
    pub fn into_record(self) -> DeviceRecord {
        DeviceRecord {
            device_id: self.device_id,
            user_id: self.user_id,
            fingerprint: self.fingerprint,
            last_known_ip: self.ip,
            location: self.location,
            connection: self.connection,
            attributes: self.attributes,
            first_seen: self.seen_at,
            last_seen: self.seen_at,
            trust_state: TrustState::Unknown,
            authorized_by: None,
            state_version: 0,
        }
    }

    /// Overwrite the descriptive fields of `record`.
    ///
    /// Identity, `first_seen` and everything trust-related are left alone.
    /// A missing location or user id keeps the stored one, and `last_seen`
    /// never moves backwards.
    pub fn merge_into(self, record: &mut DeviceRecord) {
        record.fingerprint = self.fingerprint;
        record.last_known_ip = self.ip;
        if self.user_id.is_some() {
            record.user_id = self.user_id;
        }
        if self.location.is_some() {
            record.location = self.location;
        }
        if self.connection.is_some() {
            record.connection = self.connection;
        }
        if !self.attributes.is_empty() {
            record.attributes = self.attributes;
        }
        if self.seen_at > record.last_seen {
            record.last_seen = self.seen_at;
        }
    }
}
