//! Rule evaluation.
//!
//! Rules run in a fixed order; [`DetectionResult`] takes its severity from
//! the first one that fires and keeps every signal. Nothing here touches
//! the store, the log or the ban counter.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::config::PolicyConfig;
use crate::detect::signals::{DetectionResult, Signal};
use crate::device::{DeviceRecord, Fingerprint, Location, TrustState};

/// Which rule set to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Registration: every rule.
    Full,
    /// Heartbeat: identity churn and ban only.
    Heartbeat,
}

/// Request-scoped inputs gathered by the engine.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub mode: Mode,
    pub source_ip: IpAddr,
    pub now: DateTime<Utc>,
    /// The record as it stood before this request, `None` on first sighting.
    pub baseline: Option<&'a DeviceRecord>,
    /// Fingerprint presented by this request.
    pub observed: &'a Fingerprint,
    /// Location resolved for this request. A failed lookup is `None`.
    pub location: Option<&'a Location>,
    /// Every device owned by the record's user, this one included.
    pub user_devices: &'a [DeviceRecord],
    pub source_banned: bool,
}

/// Pure evaluator bound to one policy snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Detector<'p> {
    policy: &'p PolicyConfig,
}

impl<'p> Detector<'p> {
    pub fn new(policy: &'p PolicyConfig) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, record: &DeviceRecord, ctx: &RequestContext<'_>) -> DetectionResult {
        let mut signals = Vec::new();
        let tracking = self.policy.tracking_enabled;
        let full = ctx.mode == Mode::Full;

        if tracking && full {
            if let Some(signal) = self.geo_violation(ctx) {
                signals.push(signal);
            }
            if let Some(signal) = self.device_limit(record, ctx) {
                signals.push(signal);
            }
        }
        if tracking {
            if let Some(signal) = self.identity_churn(ctx) {
                signals.push(signal);
            }
        }
        if ctx.source_banned {
            signals.push(Signal::SourceBanned { ip: ctx.source_ip });
        }
        if tracking && full {
            if let Some(signal) = self.new_device_for_user(record, ctx) {
                signals.push(signal);
            }
        }

        DetectionResult::from_signals(signals)
    }

    fn geo_violation(&self, ctx: &RequestContext<'_>) -> Option<Signal> {
        let country = &ctx.location?.country;
        self.policy.geo_fencing.violates(country).then(|| Signal::GeoViolation {
            country: country.to_ascii_uppercase(),
        })
    }

    fn device_limit(&self, record: &DeviceRecord, ctx: &RequestContext<'_>) -> Option<Signal> {
        let max = self.policy.max_devices_per_user;
        if max == 0 || record.user_id.is_none() {
            return None;
        }
        let others = ctx
            .user_devices
            .iter()
            .filter(|d| d.device_id != record.device_id)
            .filter(|d| d.trust_state == TrustState::Authorized)
            .filter(|d| ctx.now - d.last_seen <= self.policy.session_timeout)
            .count();
        let authorized = others + 1;
        (authorized > max).then_some(Signal::DeviceLimitExceeded { authorized, max })
    }

    fn identity_churn(&self, ctx: &RequestContext<'_>) -> Option<Signal> {
        let baseline = ctx.baseline?;
        if ctx.now - baseline.last_seen > self.policy.session_timeout {
            return None;
        }

        let before = &baseline.fingerprint;
        let after = ctx.observed;
        let mut fields = Vec::new();
        if normalize_user_agent(&before.user_agent) != normalize_user_agent(&after.user_agent) {
            fields.push("user_agent");
        }
        if attribute_changed(&before.platform, &after.platform) {
            fields.push("platform");
        }
        if attribute_changed(&before.vendor, &after.vendor) {
            fields.push("vendor");
        }
        if ctx.mode == Mode::Full {
            if let (Some(old), Some(new)) = (baseline.country(), ctx.location.map(|l| l.country.as_str())) {
                if !old.eq_ignore_ascii_case(new) {
                    fields.push("country");
                }
            }
        }

        (!fields.is_empty()).then_some(Signal::IdentityChurn { fields })
    }

    fn new_device_for_user(&self, record: &DeviceRecord, ctx: &RequestContext<'_>) -> Option<Signal> {
        if ctx.baseline.is_some() {
            return None;
        }
        let user_id = record.user_id.as_ref()?;
        ctx.user_devices
            .iter()
            .any(|d| d.device_id != record.device_id)
            .then(|| Signal::NewDeviceForKnownUser {
                user_id: user_id.clone(),
            })
    }
}

/// Browser version bumps are not churn: compare user agents without digits.
fn normalize_user_agent(ua: &str) -> String {
    ua.chars()
        .filter(|c| !c.is_ascii_digit())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Empty means "not reported", which is not a change.
fn attribute_changed(before: &str, after: &str) -> bool {
    !before.is_empty() && !after.is_empty() && !before.eq_ignore_ascii_case(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoFencingConfig;
    use crate::device::DeviceSnapshot;
    use crate::events::Severity;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fingerprint(ua: &str) -> Fingerprint {
        Fingerprint {
            user_agent: ua.into(),
            platform: "Win32".into(),
            vendor: "Google Inc.".into(),
        }
    }

    fn location(country: &str) -> Location {
        Location {
            latitude: 0.0,
            longitude: 0.0,
            country: country.into(),
            city: String::new(),
        }
    }

    fn record(id: &str, user: Option<&str>, country: Option<&str>) -> DeviceRecord {
        DeviceSnapshot {
            device_id: id.into(),
            user_id: user.map(str::to_string),
            fingerprint: fingerprint("Mozilla/5.0 Chrome/120.0.0.0"),
            ip: "203.0.113.9".parse().unwrap(),
            location: country.map(location),
            connection: None,
            attributes: Default::default(),
            seen_at: now() - Duration::minutes(10),
        }
        .into_record()
    }

    fn policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.geo_fencing = GeoFencingConfig {
            enabled: true,
            allowed_countries: vec![],
            blocked_countries: vec!["KP".into()],
        };
        policy.max_devices_per_user = 2;
        policy
    }

    fn ctx<'a>(
        record: &'a DeviceRecord,
        baseline: Option<&'a DeviceRecord>,
        user_devices: &'a [DeviceRecord],
    ) -> RequestContext<'a> {
        RequestContext {
            mode: Mode::Full,
            source_ip: record.last_known_ip,
            now: now(),
            baseline,
            observed: &record.fingerprint,
            location: record.location.as_ref(),
            user_devices,
            source_banned: false,
        }
    }

    #[test]
    fn clean_first_registration() {
        let policy = policy();
        let current = record("d1", None, Some("US"));
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &[]));
        assert_eq!(result, DetectionResult::clean());
    }

    #[test]
    fn blocked_country_is_high_regardless_of_other_signals() {
        let policy = policy();
        let mut authorized = vec![record("d2", Some("alice"), None), record("d3", Some("alice"), None)];
        for d in &mut authorized {
            d.trust_state = TrustState::Authorized;
        }
        let baseline = record("d1", Some("alice"), Some("US"));
        let mut current = baseline.clone();
        current.location = Some(location("KP"));
        current.fingerprint.platform = "Linux armv8l".into();

        let mut context = ctx(&current, Some(&baseline), &authorized);
        context.source_banned = true;
        let result = Detector::new(&policy).evaluate(&current, &context);

        assert!(result.is_suspicious);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.geo_violation(), Some("KP"));
        let kinds: Vec<_> = result.signals.iter().map(Signal::kind).collect();
        assert_eq!(
            kinds,
            vec!["geo_violation", "device_limit", "identity_churn", "source_banned"]
        );
    }

    #[test]
    fn allow_list_excludes_everything_else() {
        let mut policy = policy();
        policy.geo_fencing.allowed_countries = vec!["us".into()];
        let fr = record("d1", None, Some("FR"));
        let us = record("d2", None, Some("US"));
        let detector = Detector::new(&policy);
        assert!(detector.evaluate(&fr, &ctx(&fr, None, &[])).is_suspicious);
        assert!(!detector.evaluate(&us, &ctx(&us, None, &[])).is_suspicious);
    }

    #[test]
    fn absent_location_never_violates() {
        let mut policy = policy();
        policy.geo_fencing.allowed_countries = vec!["US".into()];
        let current = record("d1", None, None);
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &[]));
        assert!(!result.is_suspicious);
    }

    #[test]
    fn device_limit_counts_recent_authorized_devices_only() {
        let policy = policy();
        let mut other = record("d2", Some("alice"), None);
        other.trust_state = TrustState::Authorized;
        let mut stale = record("d3", Some("alice"), None);
        stale.trust_state = TrustState::Authorized;
        stale.last_seen = now() - Duration::hours(3);
        let pending = record("d4", Some("alice"), None);
        let current = record("d1", Some("alice"), None);

        let devices = vec![other.clone(), stale, pending, current.clone()];
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &devices));
        assert!(!result.signals.iter().any(|s| s.kind() == "device_limit"));

        let mut third = record("d5", Some("alice"), None);
        third.trust_state = TrustState::Authorized;
        let devices = vec![other, third, current.clone()];
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &devices));
        assert_eq!(
            result.signals[0],
            Signal::DeviceLimitExceeded { authorized: 3, max: 2 }
        );
        assert_eq!(result.severity, Severity::Medium);
    }

    #[test]
    fn zero_device_limit_disables_the_rule() {
        let mut policy = policy();
        policy.max_devices_per_user = 0;
        let mut devices: Vec<_> = (0..10)
            .map(|i| record(&format!("x{i}"), Some("alice"), None))
            .collect();
        for d in &mut devices {
            d.trust_state = TrustState::Authorized;
        }
        let current = record("d1", Some("alice"), None);
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &devices));
        assert!(!result.is_suspicious);
    }

    #[test]
    fn version_bump_is_not_churn() {
        let policy = policy();
        let baseline = record("d1", None, None);
        let mut current = baseline.clone();
        current.fingerprint.user_agent = "Mozilla/5.0 Chrome/121.0.6167.85".into();
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, Some(&baseline), &[]));
        assert!(!result.is_suspicious);
    }

    #[test]
    fn churn_outside_session_window_is_ignored() {
        let policy = policy();
        let mut baseline = record("d1", None, None);
        baseline.last_seen = now() - Duration::hours(2);
        let mut current = baseline.clone();
        current.fingerprint.vendor = "Apple Computer, Inc.".into();
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, Some(&baseline), &[]));
        assert!(!result.is_suspicious);
    }

    #[test]
    fn heartbeat_mode_skips_geo_and_count() {
        let policy = policy();
        let baseline = record("d1", None, Some("US"));
        let mut current = baseline.clone();
        current.location = Some(location("KP"));
        let observed = fingerprint("curl/8.4.0");

        let mut context = ctx(&current, Some(&baseline), &[]);
        context.mode = Mode::Heartbeat;
        context.observed = &observed;
        let result = Detector::new(&policy).evaluate(&current, &context);
        assert_eq!(
            result.signals,
            vec![Signal::IdentityChurn {
                fields: vec!["user_agent"]
            }]
        );
    }

    #[test]
    fn new_device_for_known_user_is_informational() {
        let policy = policy();
        let existing = record("d2", Some("alice"), None);
        let current = record("d1", Some("alice"), None);
        let devices = vec![existing, current.clone()];
        let result = Detector::new(&policy).evaluate(&current, &ctx(&current, None, &devices));
        assert!(!result.is_suspicious);
        assert!(result.notify_new_device());
    }

    #[test]
    fn tracking_disabled_leaves_only_the_ban_rule() {
        let mut policy = policy();
        policy.tracking_enabled = false;
        let current = record("d1", None, Some("KP"));
        let mut context = ctx(&current, None, &[]);
        assert!(!Detector::new(&policy).evaluate(&current, &context).is_suspicious);

        context.source_banned = true;
        let result = Detector::new(&policy).evaluate(&current, &context);
        assert!(result.auto_deny);
        assert_eq!(result.severity, Severity::High);
    }
}
