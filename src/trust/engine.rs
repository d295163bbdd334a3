//! The request-path orchestrator.
//!
//! # Data Flow
//! ```text
//! register:  enrich (deadline) → upsert → user devices → ban check
//!            → detect (full) → events + strikes → CAS state → notify
//! heartbeat: skew check → touch_last_seen → (stale: replay decision)
//!            → detect (light) → anomaly event + strikes → CAS state
//! operator:  unconditional state write → audit event (must land)
//! ```
//!
//! # Design Decisions
//! - The engine owns no persistent state; store, log and counters are
//!   collaborators injected at construction
//! - Policy is an `ArcSwap` snapshot loaded once per operation, so a reload
//!   never changes the rules halfway through a request
//! - Automated transitions are compare-and-swap on `state_version`; on
//!   conflict the record is re-read and the transition re-derived
//! - If the durable trust state cannot be confirmed the decision is an
//!   explicit degraded deny, never a hang
//! - Events already appended stay appended when a later step fails

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::{PolicyConfig, RetryConfig, TimeoutConfig, TrustConfig};
use crate::detect::{DetectionResult, Detector, Mode, RequestContext, Signal};
use crate::device::{
    validate_device_id, Actor, DeviceRecord, DeviceSnapshot, Fingerprint, Heartbeat,
    Registration, TrustState, ValidationError,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{
    EventFilter, EventLog, EventType, LogError, MemoryEventLog, NewSecurityEvent, SecurityEvent,
    SecurityReport, Severity, SharedEventLog,
};
use crate::geo::{self, NoopResolver, SharedGeoResolver};
use crate::notify::{LogNotifier, SharedNotifier};
use crate::observability::metrics;
use crate::resilience::{guarded, with_deadline, Retryable};
use crate::security::ban::BanCounter;
use crate::store::{
    DeviceStore, MemoryDeviceStore, SharedDeviceStore, StateChange, StoreError, StoreStats, Touch,
};
use crate::trust::state::{next_state, transition_event, OperatorAction, Verdict};

/// Attempts at an automated compare-and-swap before giving up.
const MAX_STATE_ATTEMPTS: usize = 3;

/// The engine's collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: SharedDeviceStore,
    pub events: SharedEventLog,
    pub bans: Arc<BanCounter>,
    pub geo: SharedGeoResolver,
    pub notifier: SharedNotifier,
    pub clock: SharedClock,
}

impl Collaborators {
    /// In-process store and log, no geolocation, log notifications.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            store: Arc::new(MemoryDeviceStore::new()),
            events: Arc::new(MemoryEventLog::new(clock.clone())),
            bans: Arc::new(BanCounter::new(clock.clone())),
            geo: Arc::new(NoopResolver),
            notifier: Arc::new(LogNotifier),
            clock,
        }
    }

    pub fn with_store(mut self, store: SharedDeviceStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_events(mut self, events: SharedEventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_geo(mut self, geo: SharedGeoResolver) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Deadlines and retry budget for collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub timeouts: TimeoutConfig,
    pub retries: RetryConfig,
}

impl EngineSettings {
    pub fn from_config(config: &TrustConfig) -> Self {
        Self {
            timeouts: config.timeouts.clone(),
            retries: config.retries.clone(),
        }
    }
}

/// Admission decision returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub device_id: String,
    pub verdict: Verdict,
    pub trust_state: TrustState,
    pub reasons: Vec<String>,
    /// The durable trust state could not be confirmed.
    pub degraded: bool,
}

impl Decision {
    pub fn authorized(&self) -> bool {
        self.verdict.admitted()
    }

    pub fn flagged(&self) -> bool {
        self.verdict == Verdict::AdmitFlagged
    }
}

/// Counters for the admin surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub devices: StoreStats,
    pub security_events: usize,
    pub banned_keys: usize,
    pub tracked_keys: usize,
}

/// Result of applying an automated evaluation.
struct Applied {
    previous: TrustState,
    record: DeviceRecord,
}

pub struct TrustEngine {
    policy: ArcSwap<PolicyConfig>,
    settings: EngineSettings,
    store: SharedDeviceStore,
    events: SharedEventLog,
    bans: Arc<BanCounter>,
    geo: SharedGeoResolver,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl TrustEngine {
    pub fn new(policy: PolicyConfig, settings: EngineSettings, collaborators: Collaborators) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            settings,
            store: collaborators.store,
            events: collaborators.events,
            bans: collaborators.bans,
            geo: collaborators.geo,
            notifier: collaborators.notifier,
            clock: collaborators.clock,
        }
    }

    pub fn from_config(config: &TrustConfig, collaborators: Collaborators) -> Self {
        Self::new(
            PolicyConfig::from_config(config),
            EngineSettings::from_config(config),
            collaborators,
        )
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<PolicyConfig> {
        self.policy.load_full()
    }

    /// Atomically swap in a new policy. In-flight operations finish on the
    /// snapshot they started with.
    pub fn replace_policy(&self, policy: PolicyConfig) {
        tracing::info!(
            tracking = policy.tracking_enabled,
            block_suspicious = policy.block_suspicious,
            max_devices_per_user = policy.max_devices_per_user,
            geofencing = policy.geo_fencing.enabled,
            "policy replaced"
        );
        self.policy.store(Arc::new(policy));
    }

    pub fn bans(&self) -> &BanCounter {
        &self.bans
    }

    /// Register (or re-register) a device and decide whether to admit it.
    pub async fn register_device(
        &self,
        registration: Registration,
        source_ip: IpAddr,
    ) -> EngineResult<Decision> {
        let policy = self.policy.load_full();
        let now = self.clock.now();
        let device_id = registration.device_id.clone();

        let enrichment = geo::enrich(&*self.geo, source_ip, self.settings.timeouts.geolocation()).await;
        metrics::record_enrichment(enrichment.outcome.label());

        let snapshot = DeviceSnapshot {
            device_id: registration.device_id,
            user_id: registration.user_id,
            fingerprint: registration.fingerprint,
            ip: source_ip,
            location: enrichment.location.clone(),
            connection: registration.connection,
            attributes: registration.attributes,
            seen_at: now,
        };
        let outcome = match self
            .with_store("upsert", || self.store.upsert(snapshot.clone()))
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return Ok(self.degraded("register", &device_id, source_ip, &err)),
        };

        let user_devices = match outcome.record.user_id.as_deref() {
            Some(user_id) => {
                match self
                    .with_store("devices_for_user", || self.store.devices_for_user(user_id))
                    .await
                {
                    Ok(devices) => devices,
                    Err(err) => return Ok(self.degraded("register", &device_id, source_ip, &err)),
                }
            }
            None => Vec::new(),
        };

        let ctx = RequestContext {
            mode: Mode::Full,
            source_ip,
            now,
            baseline: outcome.previous.as_ref(),
            observed: &outcome.record.fingerprint,
            location: enrichment.location.as_ref(),
            user_devices: &user_devices,
            source_banned: self.bans.is_banned(&ban_key(source_ip)),
        };
        let detection = Detector::new(&policy).evaluate(&outcome.record, &ctx);

        if let Some(country) = detection.geo_violation() {
            let event = self
                .event_for(&outcome.record, EventType::GeoViolation, Severity::High, source_ip)
                .details(format!("country {country} is outside the geofence"));
            self.record_event(event).await;
        }
        if strike_worthy(&detection) {
            self.strike(source_ip, Some(&device_id), &policy).await;
        }

        let applied = match self
            .apply_evaluation(outcome.record, &detection, Mode::Full, &policy)
            .await
        {
            Ok(applied) => applied,
            Err(err) => return Ok(self.degraded("register", &device_id, source_ip, &err)),
        };
        let state = applied.record.trust_state;

        let transitioned = self
            .emit_transition(&applied, &detection, source_ip)
            .await;
        if detection.is_suspicious && !transitioned {
            let event = self
                .event_for(&applied.record, EventType::SuspiciousDevice, detection.severity, source_ip)
                .details(detection.reasons().join("; "));
            self.record_event(event).await;
        }

        if detection.notify_new_device() && policy.notify_on_new_device {
            self.notify_new_device(&applied.record).await;
        }

        let decision = self.decide(&applied.record, &detection);
        tracing::info!(
            device_id = %decision.device_id,
            source_ip = %source_ip,
            created = outcome.previous.is_none(),
            enrichment = enrichment.outcome.label(),
            verdict = decision.verdict.as_str(),
            trust_state = %state,
            reasons = ?decision.reasons,
            "device registration evaluated"
        );
        metrics::record_decision("register", decision.verdict.as_str());
        Ok(decision)
    }

    /// Record a heartbeat and re-check the device.
    ///
    /// Replaying a heartbeat (same or older timestamp) changes nothing and
    /// emits nothing; it only reports the current decision.
    pub async fn heartbeat(&self, heartbeat: Heartbeat, source_ip: IpAddr) -> EngineResult<Decision> {
        let policy = self.policy.load_full();
        let now = self.clock.now();

        let ahead = heartbeat.timestamp - now;
        if ahead > policy.heartbeat_max_skew {
            return Err(ValidationError::TimestampInFuture {
                ahead_secs: ahead.num_seconds(),
            }
            .into());
        }

        let device_id = heartbeat.device_id.as_str();
        let touch = match self
            .with_store("touch_last_seen", || {
                self.store.touch_last_seen(device_id, heartbeat.timestamp)
            })
            .await
        {
            Ok(touch) => touch,
            Err(StoreError::NotFound(id)) => return Err(EngineError::NotFound(id)),
            Err(err) => return Ok(self.degraded("heartbeat", device_id, source_ip, &err)),
        };

        let source_banned = self.bans.is_banned(&ban_key(source_ip));
        let (record, previous_last_seen) = match touch {
            Touch::Stale(record) => {
                let detection = if source_banned {
                    DetectionResult::from_signals(vec![Signal::SourceBanned { ip: source_ip }])
                } else {
                    DetectionResult::clean()
                };
                let decision = self.decide(&record, &detection);
                tracing::debug!(
                    device_id,
                    timestamp = %heartbeat.timestamp,
                    verdict = decision.verdict.as_str(),
                    "stale heartbeat ignored"
                );
                metrics::record_decision("heartbeat", decision.verdict.as_str());
                return Ok(decision);
            }
            Touch::Advanced {
                record,
                previous_last_seen,
            } => (record, previous_last_seen),
        };

        let mut baseline = record.clone();
        baseline.last_seen = previous_last_seen;
        let observed = Fingerprint {
            user_agent: heartbeat
                .user_agent
                .clone()
                .unwrap_or_else(|| record.fingerprint.user_agent.clone()),
            ..record.fingerprint.clone()
        };
        let ctx = RequestContext {
            mode: Mode::Heartbeat,
            source_ip,
            now,
            baseline: Some(&baseline),
            observed: &observed,
            location: None,
            user_devices: &[],
            source_banned,
        };
        let detection = Detector::new(&policy).evaluate(&record, &ctx);
        let repeat = already_flagged(&record, &detection);

        if detection.is_suspicious && !repeat {
            let event = self
                .event_for(&record, EventType::AnomalyDetected, detection.severity, source_ip)
                .details(format!(
                    "{} (heartbeat {}, status {})",
                    detection.reasons().join("; "),
                    heartbeat.timestamp.to_rfc3339(),
                    heartbeat.status.as_deref().unwrap_or("-"),
                ));
            self.record_event(event).await;
        }
        if strike_worthy(&detection) && !repeat {
            self.strike(source_ip, Some(device_id), &policy).await;
        }

        let applied = match self
            .apply_evaluation(record, &detection, Mode::Heartbeat, &policy)
            .await
        {
            Ok(applied) => applied,
            Err(err) => return Ok(self.degraded("heartbeat", device_id, source_ip, &err)),
        };
        self.emit_transition(&applied, &detection, source_ip).await;

        let decision = self.decide(&applied.record, &detection);
        tracing::debug!(
            device_id,
            source_ip = %source_ip,
            status = heartbeat.status.as_deref().unwrap_or("-"),
            verdict = decision.verdict.as_str(),
            trust_state = %decision.trust_state,
            "heartbeat evaluated"
        );
        metrics::record_decision("heartbeat", decision.verdict.as_str());
        Ok(decision)
    }

    /// Operator authorization. Allowed from every state; always audited.
    pub async fn authorize(
        &self,
        device_id: &str,
        operator: &str,
        source_ip: IpAddr,
    ) -> EngineResult<DeviceRecord> {
        self.operator_action(device_id, operator, source_ip, OperatorAction::Authorize)
            .await
    }

    /// Operator block. Allowed from every state; always audited.
    pub async fn block(
        &self,
        device_id: &str,
        operator: &str,
        source_ip: IpAddr,
    ) -> EngineResult<DeviceRecord> {
        self.operator_action(device_id, operator, source_ip, OperatorAction::Block)
            .await
    }

    pub async fn get_device(&self, device_id: &str) -> EngineResult<DeviceRecord> {
        validate_device_id(device_id)?;
        Ok(self.with_store("get", || self.store.get(device_id)).await?)
    }

    /// Query the log, most recent first. `limit` is clamped to the policy's
    /// default and maximum.
    pub async fn list_security_events(
        &self,
        filter: &EventFilter,
        limit: Option<usize>,
    ) -> EngineResult<Vec<SecurityEvent>> {
        let limit = self.policy.load().events.clamp(limit);
        Ok(self
            .with_log("query", || self.events.query(filter, limit))
            .await?)
    }

    /// Append a client-reported event. Server fields are always assigned here.
    pub async fn log_security_event(
        &self,
        report: SecurityReport,
        source_ip: IpAddr,
    ) -> EngineResult<SecurityEvent> {
        let event = report.validate(source_ip)?;
        let recorded = self.append_event(event).await?;
        tracing::info!(
            event_id = recorded.id,
            event_type = %recorded.event_type,
            severity = %recorded.severity,
            device_id = recorded.device_id.as_deref().unwrap_or("-"),
            source_ip = %source_ip,
            "client security event recorded"
        );
        Ok(recorded)
    }

    /// A request from `ip` was throttled. Counts as a failure toward a ban.
    pub async fn note_throttled(&self, ip: IpAddr) {
        metrics::record_rate_limited();
        let policy = self.policy.load_full();
        self.strike(ip, None, &policy).await;
    }

    /// Drop lapsed ban counters. Returns the number removed.
    pub fn purge_expired_bans(&self) -> usize {
        let policy = self.policy.load();
        self.bans.purge_expired(&policy.fail2ban)
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let devices = self.with_store("stats", || self.store.stats()).await?;
        let security_events = self.with_log("count", || self.events.count()).await?;
        Ok(EngineStats {
            devices,
            security_events,
            banned_keys: self.bans.banned_count(),
            tracked_keys: self.bans.tracked_keys(),
        })
    }

    async fn operator_action(
        &self,
        device_id: &str,
        operator: &str,
        source_ip: IpAddr,
        action: OperatorAction,
    ) -> EngineResult<DeviceRecord> {
        validate_device_id(device_id)?;
        let actor = Actor::Operator(operator.to_string());
        let change = StateChange {
            device_id: device_id.to_string(),
            expected_version: None,
            state: action.target(),
            actor: actor.clone(),
        };
        let update = self
            .with_store("set_trust_state", || self.store.set_trust_state(change.clone()))
            .await?;

        if action == OperatorAction::Authorize {
            self.bans.reset(&ban_key(update.record.last_known_ip));
        }

        let (event_type, severity) = transition_event(update.previous, action.target(), &actor, Severity::Info)
            .unwrap_or((EventType::DeviceAuthorized, Severity::Info));
        let event = self
            .event_for(&update.record, event_type, severity, source_ip)
            .details(format!(
                "{} by {actor} (was {})",
                action.target(),
                update.previous
            ));
        // The state change is already committed; a lost audit event is
        // reported to the caller.
        self.append_event(event).await?;

        match action {
            OperatorAction::Authorize => tracing::info!(
                device_id,
                operator,
                previous = %update.previous,
                "device manually authorized"
            ),
            OperatorAction::Block => tracing::warn!(
                device_id,
                operator,
                previous = %update.previous,
                "device manually blocked"
            ),
        }
        Ok(update.record)
    }

    /// Compare-and-swap the automated transition for `record`.
    async fn apply_evaluation(
        &self,
        mut record: DeviceRecord,
        detection: &DetectionResult,
        mode: Mode,
        policy: &PolicyConfig,
    ) -> Result<Applied, StoreError> {
        for _ in 0..MAX_STATE_ATTEMPTS {
            let previous = record.trust_state;
            let next = next_state(previous, detection, mode, policy.block_suspicious);
            if next == previous {
                return Ok(Applied { previous, record });
            }

            let change = StateChange {
                device_id: record.device_id.clone(),
                expected_version: Some(record.state_version),
                state: next,
                actor: Actor::System,
            };
            match self
                .with_store("set_trust_state", || self.store.set_trust_state(change.clone()))
                .await
            {
                Ok(update) => {
                    return Ok(Applied {
                        previous: update.previous,
                        record: update.record,
                    })
                }
                Err(StoreError::Conflict {
                    expected, actual, ..
                }) => {
                    tracing::debug!(
                        device_id = %record.device_id,
                        expected,
                        actual,
                        "trust state moved during evaluation, re-deriving"
                    );
                    let device_id = record.device_id.clone();
                    record = self
                        .with_store("get", || self.store.get(&device_id))
                        .await?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Unavailable(format!(
            "trust state for `{}` kept changing during evaluation",
            record.device_id
        )))
    }

    /// Append the event for a committed automated transition. Returns
    /// whether one was due.
    async fn emit_transition(
        &self,
        applied: &Applied,
        detection: &DetectionResult,
        source_ip: IpAddr,
    ) -> bool {
        let next = applied.record.trust_state;
        let Some((event_type, severity)) =
            transition_event(applied.previous, next, &Actor::System, detection.severity)
        else {
            return false;
        };

        let event = self
            .event_for(&applied.record, event_type, severity, source_ip)
            .details(format!(
                "{} -> {}: {}",
                applied.previous,
                next,
                detection.reasons().join("; ")
            ));
        self.record_event(event).await;
        if next == TrustState::Blocked {
            tracing::warn!(
                device_id = %applied.record.device_id,
                severity = %severity,
                "device automatically blocked"
            );
        }
        true
    }

    async fn strike(&self, source_ip: IpAddr, device_id: Option<&str>, policy: &PolicyConfig) {
        let strike = self.bans.record_failure(&ban_key(source_ip), &policy.fail2ban);
        if !strike.newly_banned {
            return;
        }
        metrics::record_ban();
        let mut event = NewSecurityEvent::new(EventType::RateLimitExceeded, Severity::High, source_ip)
            .details(format!(
                "source banned for {}s after {} failures",
                policy.fail2ban.ban_time, strike.count
            ));
        if let Some(id) = device_id {
            event = event.device(id);
        }
        self.record_event(event).await;
    }

    async fn notify_new_device(&self, record: &DeviceRecord) {
        let limit = self.settings.timeouts.event_log();
        match with_deadline("notify", limit, self.notifier.new_device(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(device_id = %record.device_id, error = %err, "new-device notification failed"),
            Err(err) => tracing::warn!(device_id = %record.device_id, error = %err, "new-device notification timed out"),
        }
    }

    fn decide(&self, record: &DeviceRecord, detection: &DetectionResult) -> Decision {
        Decision {
            device_id: record.device_id.clone(),
            verdict: Verdict::decide(record.trust_state, detection),
            trust_state: record.trust_state,
            reasons: detection.reasons(),
            degraded: false,
        }
    }

    fn degraded(&self, operation: &'static str, device_id: &str, source_ip: IpAddr, err: &StoreError) -> Decision {
        tracing::error!(
            operation,
            device_id,
            source_ip = %source_ip,
            error = %err,
            "trust state unconfirmed, denying by default"
        );
        metrics::record_decision(operation, "degraded");
        Decision {
            device_id: device_id.to_string(),
            verdict: Verdict::Deny,
            trust_state: TrustState::Unknown,
            reasons: vec![format!("device state unavailable: {err}")],
            degraded: true,
        }
    }

    fn event_for(
        &self,
        record: &DeviceRecord,
        event_type: EventType,
        severity: Severity,
        source_ip: IpAddr,
    ) -> NewSecurityEvent {
        NewSecurityEvent::new(event_type, severity, source_ip)
            .device(record.device_id.clone())
            .user(record.user_id.clone())
    }

    /// Append, surfacing failure to the caller.
    async fn append_event(&self, event: NewSecurityEvent) -> Result<SecurityEvent, LogError> {
        let recorded = self
            .with_log("append", || self.events.append(event.clone()))
            .await?;
        metrics::record_security_event(recorded.event_type.as_str(), recorded.severity.as_str());
        Ok(recorded)
    }

    /// Append on the automated path: a failure is logged loudly and the
    /// decision still goes out.
    async fn record_event(&self, event: NewSecurityEvent) {
        let event_type = event.event_type;
        let device_id = event.device_id.clone();
        if let Err(err) = self.append_event(event).await {
            tracing::error!(
                event_type = %event_type,
                device_id = device_id.as_deref().unwrap_or("-"),
                error = %err,
                "security event could not be recorded"
            );
        }
    }

    async fn with_store<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let result = guarded(
            &self.settings.retries,
            operation,
            self.settings.timeouts.store(),
            call,
        )
        .await;
        if matches!(&result, Err(err) if err.is_transient()) {
            metrics::record_collaborator_failure(operation);
        }
        result
    }

    async fn with_log<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, LogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LogError>>,
    {
        let result = guarded(
            &self.settings.retries,
            operation,
            self.settings.timeouts.event_log(),
            call,
        )
        .await;
        if result.is_err() {
            metrics::record_collaborator_failure(operation);
        }
        result
    }
}

/// Ban-counter key for a source address.
pub fn ban_key(ip: IpAddr) -> String {
    ip.to_string()
}

/// Suspicion about the device itself counts toward the source's ban; being
/// banned already does not.
/// Churn on a device already held for review or blocked was reported when
/// the device was flagged; the baseline only moves on re-registration.
fn already_flagged(record: &DeviceRecord, detection: &DetectionResult) -> bool {
    matches!(
        record.trust_state,
        TrustState::PendingReview | TrustState::Blocked
    ) && detection
        .signals
        .iter()
        .filter(|s| s.is_suspicious())
        .all(|s| matches!(s, Signal::IdentityChurn { .. }))
}

fn strike_worthy(detection: &DetectionResult) -> bool {
    detection
        .signals
        .iter()
        .any(|s| s.is_suspicious() && !matches!(s, Signal::SourceBanned { .. }))
}
