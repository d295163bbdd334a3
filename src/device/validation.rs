//! Boundary payloads and their validation.
//!
//! Client JSON is deserialized into the `*Request`/`DeviceInfo` shapes
//! (unknown fields rejected) and then validated into the typed values the
//! engine accepts. Nothing unvalidated crosses into the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use uuid::Uuid;

use crate::device::types::{
    ClientAttributes, ConnectionProfile, Fingerprint, ReportedPosition, ScreenResolution,
};

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_USER_ID_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 512;
const MAX_ATTRIBUTE_LEN: usize = 128;
const MAX_CONNECTION_FIELD_LEN: usize = 32;
const MAX_STATUS_LEN: usize = 64;
const MAX_LANGUAGE_LEN: usize = 35;
const MAX_TIMEZONE_LEN: usize = 64;
const MAX_DNT_LEN: usize = 16;
const MAX_WEBGL_LEN: usize = 256;
const MAX_CANVAS_LEN: usize = 64 * 1024;
const MAX_SCREEN_EDGE: u32 = 32_768;
const MAX_CORES: f64 = 4096.0;
const MAX_MEMORY_GB: f64 = 4096.0;

/// Rejected client input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("field `{0}` contains invalid characters")]
    InvalidCharacters(&'static str),

    #[error("timestamp is {ahead_secs}s ahead of server time")]
    TimestampInFuture { ahead_secs: i64 },

    #[error("field `{field}` is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Registration body as sent by clients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceInfo {
    #[serde(default, alias = "deviceId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub connection: Option<ConnectionProfile>,

    // Advisory browser environment.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub cookies_enabled: Option<bool>,
    #[serde(default)]
    pub do_not_track: Option<String>,
    #[serde(default)]
    pub screen_resolution: Option<ScreenResolution>,
    #[serde(default, rename = "webGL")]
    pub web_gl: Option<WebGlInfo>,
    #[serde(default)]
    pub canvas: Option<CanvasInfo>,
    #[serde(default)]
    pub audio: Option<AudioInfo>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timezone_offset: Option<i32>,
    /// A number, or the string `"unknown"`.
    #[serde(default, deserialize_with = "number_or_unknown")]
    pub cores: Option<f64>,
    /// Gigabytes, or the string `"unknown"`.
    #[serde(default, deserialize_with = "number_or_unknown")]
    pub memory: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub geolocation: Option<ReportedPosition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebGlInfo {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub renderer: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub unmasked_vendor: Option<String>,
    #[serde(default)]
    pub unmasked_renderer: Option<String>,
}

/// Only availability is kept; the rendered data URL is bounded and dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CanvasInfo {
    pub available: bool,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AudioInfo {
    pub available: bool,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrLabel {
    Number(f64),
    Label(String),
}

fn number_or_unknown<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrLabel>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrLabel::Number(n)) => Ok(Some(n)),
        Some(NumberOrLabel::Label(label)) if label.eq_ignore_ascii_case("unknown") => Ok(None),
        Some(NumberOrLabel::Label(label)) => Err(serde::de::Error::custom(format!(
            "expected a number or \"unknown\", found `{label}`"
        ))),
    }
}

/// A validated registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub device_id: String,
    pub user_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub connection: Option<ConnectionProfile>,
    pub attributes: ClientAttributes,
}

impl DeviceInfo {
    /// Validate into a [`Registration`].
    ///
    /// `header_user_agent` is the request's `User-Agent` header. It becomes
    /// the fingerprint's user agent, since heartbeats are compared against
    /// the header; the body value is used only when the header is absent.
    /// A missing session id is replaced by a fresh UUID.
    pub fn validate(self, header_user_agent: Option<&str>) -> Result<Registration, ValidationError> {
        let mut attributes = self.attributes()?;
        let device_id = match self.session_id {
            Some(id) => {
                validate_device_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let user_id = match self.user_id.map(|u| u.trim().to_string()) {
            Some(u) if u.is_empty() => None,
            Some(u) => {
                check_text("userId", &u, MAX_USER_ID_LEN)?;
                Some(u)
            }
            None => None,
        };

        let header_user_agent = non_empty(header_user_agent.map(str::to_string));
        let body_user_agent = non_empty(self.user_agent);
        let user_agent = header_user_agent
            .or_else(|| body_user_agent.clone())
            .ok_or(ValidationError::Missing("userAgent"))?;
        check_text("userAgent", &user_agent, MAX_USER_AGENT_LEN)?;
        if let Some(body) = &body_user_agent {
            check_text("userAgent", body, MAX_USER_AGENT_LEN)?;
        }
        let reported_user_agent = body_user_agent.filter(|body| *body != user_agent);

        let platform = self.platform.unwrap_or_default();
        check_text("platform", &platform, MAX_ATTRIBUTE_LEN)?;
        let vendor = self.vendor.unwrap_or_default();
        check_text("vendor", &vendor, MAX_ATTRIBUTE_LEN)?;

        if let Some(connection) = &self.connection {
            validate_connection(connection)?;
        }
        attributes.reported_user_agent = reported_user_agent;

        Ok(Registration {
            device_id,
            user_id,
            fingerprint: Fingerprint {
                user_agent,
                platform,
                vendor,
            },
            connection: self.connection,
            attributes,
        })
    }

    fn attributes(&self) -> Result<ClientAttributes, ValidationError> {
        let language = non_empty(self.language.clone());
        if let Some(language) = &language {
            check_text("language", language, MAX_LANGUAGE_LEN)?;
        }
        let timezone = non_empty(self.timezone.clone());
        if let Some(timezone) = &timezone {
            check_text("timezone", timezone, MAX_TIMEZONE_LEN)?;
        }
        if let Some(offset) = self.timezone_offset {
            if !(-24 * 60..=24 * 60).contains(&offset) {
                return Err(malformed("timezoneOffset", "must be within a day of UTC"));
            }
        }
        let do_not_track = non_empty(self.do_not_track.clone());
        if let Some(dnt) = &do_not_track {
            check_text("doNotTrack", dnt, MAX_DNT_LEN)?;
        }
        if let Some(screen) = &self.screen_resolution {
            validate_screen(screen)?;
        }
        let cores = self
            .cores
            .map(|n| bounded_count("cores", n, MAX_CORES))
            .transpose()?;
        if let Some(memory) = self.memory {
            if !memory.is_finite() || memory <= 0.0 || memory > MAX_MEMORY_GB {
                return Err(malformed("memory", "must be a positive number of gigabytes"));
            }
        }

        let webgl_renderer = match &self.web_gl {
            Some(gl) => {
                for (field, value) in [
                    ("webGL.vendor", &gl.vendor),
                    ("webGL.renderer", &gl.renderer),
                    ("webGL.version", &gl.version),
                    ("webGL.unmaskedVendor", &gl.unmasked_vendor),
                    ("webGL.unmaskedRenderer", &gl.unmasked_renderer),
                ] {
                    if let Some(value) = value {
                        check_text(field, value, MAX_WEBGL_LEN)?;
                    }
                }
                non_empty(gl.unmasked_renderer.clone().or_else(|| gl.renderer.clone()))
            }
            None => None,
        };
        if let Some(fingerprint) = self.canvas.as_ref().and_then(|c| c.fingerprint.as_ref()) {
            check_text("canvas.fingerprint", fingerprint, MAX_CANVAS_LEN)?;
        }
        if let Some(audio) = &self.audio {
            if let Some(state) = &audio.state {
                check_text("audio.state", state, MAX_CONNECTION_FIELD_LEN)?;
            }
            if audio.sample_rate.is_some_and(|rate| !rate.is_finite() || rate < 0.0) {
                return Err(malformed("audio.sampleRate", "must be a non-negative number"));
            }
        }
        if let Some(position) = &self.geolocation {
            validate_position(position)?;
        }

        Ok(ClientAttributes {
            language,
            timezone,
            timezone_offset: self.timezone_offset,
            screen: self.screen_resolution,
            cores,
            memory_gb: self.memory,
            cookies_enabled: self.cookies_enabled,
            do_not_track,
            webgl_renderer,
            canvas_available: self.canvas.as_ref().map(|c| c.available),
            audio_available: self.audio.as_ref().map(|a| a.available),
            reported_user_agent: None,
            reported_position: self.geolocation,
            reported_at: self.timestamp,
        })
    }
}

/// Heartbeat body as sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A validated heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: Option<String>,
    /// `User-Agent` of the heartbeat request, if any.
    pub user_agent: Option<String>,
}

impl HeartbeatRequest {
    pub fn validate(self, header_user_agent: Option<&str>) -> Result<Heartbeat, ValidationError> {
        validate_device_id(&self.device_id)?;
        if let Some(status) = &self.status {
            check_text("status", status, MAX_STATUS_LEN)?;
        }
        let user_agent = header_user_agent
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty());
        if let Some(ua) = &user_agent {
            check_text("User-Agent", ua, MAX_USER_AGENT_LEN)?;
        }
        Ok(Heartbeat {
            device_id: self.device_id,
            timestamp: self.timestamp,
            status: self.status,
            user_agent,
        })
    }
}

/// Device ids are opaque but restricted to a URL- and log-safe alphabet.
pub fn validate_device_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::Missing("deviceId"));
    }
    if id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "deviceId",
            max: MAX_DEVICE_ID_LEN,
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
    {
        return Err(ValidationError::InvalidCharacters("deviceId"));
    }
    Ok(())
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidCharacters(field));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn malformed(field: &'static str, reason: &str) -> ValidationError {
    ValidationError::Malformed {
        field,
        reason: reason.into(),
    }
}

fn bounded_count(field: &'static str, value: f64, max: f64) -> Result<u32, ValidationError> {
    if value.fract() != 0.0 || !(1.0..=max).contains(&value) {
        return Err(malformed(field, "must be a positive whole number"));
    }
    Ok(value as u32)
}

fn validate_connection(connection: &ConnectionProfile) -> Result<(), ValidationError> {
    for (field, value) in [
        ("connection.type", &connection.kind),
        ("connection.effectiveType", &connection.effective_type),
    ] {
        if let Some(value) = value {
            check_text(field, value, MAX_CONNECTION_FIELD_LEN)?;
        }
    }
    for (field, value) in [
        ("connection.downlink", connection.downlink),
        ("connection.downlinkMax", connection.downlink_max),
    ] {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(malformed(field, "must be a non-negative number"));
        }
    }
    Ok(())
}

fn validate_screen(screen: &ScreenResolution) -> Result<(), ValidationError> {
    if screen.width > MAX_SCREEN_EDGE || screen.height > MAX_SCREEN_EDGE {
        return Err(malformed("screenResolution", "dimensions out of range"));
    }
    if screen.depth.is_some_and(|d| d > 64) {
        return Err(malformed("screenResolution.depth", "must be at most 64"));
    }
    if screen
        .pixel_ratio
        .is_some_and(|r| !r.is_finite() || r <= 0.0 || r > 16.0)
    {
        return Err(malformed("screenResolution.pixelRatio", "must be in (0, 16]"));
    }
    Ok(())
}

fn validate_position(position: &ReportedPosition) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&position.latitude) || !(-180.0..=180.0).contains(&position.longitude) {
        return Err(malformed("geolocation", "coordinates out of range"));
    }
    if position.accuracy.is_some_and(|a| !a.is_finite() || a < 0.0) {
        return Err(malformed("geolocation.accuracy", "must be a non-negative number"));
    }
    Ok(())
}
