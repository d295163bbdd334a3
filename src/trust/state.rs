//! Authorization state machine.
//!
//! ```text
//!            clean registration
//! Unknown ───────────────────────────▶ Authorized
//!    │  suspicious (no hard block)        │
//!    ▼                                    │ suspicious
//! PendingReview ◀─────────────────────────┘
//!    │  high/critical + block_suspicious
//!    ▼
//! Blocked   (sticky: only an operator authorize leaves it)
//! ```
//!
//! Operator authorize/block are accepted from every state.

use serde::Serialize;

use crate::detect::{DetectionResult, Mode};
use crate::device::{Actor, TrustState};
use crate::events::{EventType, Severity};

/// Explicit operator decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Authorize,
    Block,
}

impl OperatorAction {
    pub fn target(self) -> TrustState {
        match self {
            OperatorAction::Authorize => TrustState::Authorized,
            OperatorAction::Block => TrustState::Blocked,
        }
    }
}

/// State after an automated evaluation.
pub fn next_state(
    current: TrustState,
    detection: &DetectionResult,
    mode: Mode,
    block_suspicious: bool,
) -> TrustState {
    if current == TrustState::Blocked {
        return TrustState::Blocked;
    }
    if let Some(severity) = detection.state_severity() {
        return if block_suspicious && severity >= Severity::High {
            TrustState::Blocked
        } else {
            TrustState::PendingReview
        };
    }
    match current {
        TrustState::Unknown if mode == Mode::Full && !detection.is_suspicious => {
            TrustState::Authorized
        }
        unchanged => unchanged,
    }
}

/// The event a committed transition must produce, if any.
///
/// Operator actions always produce one. Automated transitions produce one
/// whenever the state actually changed, except the silent admission of a
/// clean new device.
pub fn transition_event(
    previous: TrustState,
    next: TrustState,
    actor: &Actor,
    detection_severity: Severity,
) -> Option<(EventType, Severity)> {
    match actor {
        Actor::Operator(_) => Some(match next {
            TrustState::Blocked => (EventType::DeviceBlocked, Severity::Warning),
            _ => (EventType::DeviceAuthorized, Severity::Info),
        }),
        Actor::System if previous == next => None,
        Actor::System => match next {
            TrustState::Authorized if previous == TrustState::Unknown => None,
            TrustState::Authorized => Some((EventType::DeviceAuthorized, Severity::Info)),
            TrustState::PendingReview => Some((EventType::SuspiciousDevice, detection_severity)),
            TrustState::Blocked => Some((EventType::DeviceBlocked, detection_severity)),
            TrustState::Unknown => None,
        },
    }
}

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Admit,
    /// Admitted, but the detector recorded non-blocking signals.
    AdmitFlagged,
    Deny,
}

impl Verdict {
    pub fn decide(state: TrustState, detection: &DetectionResult) -> Self {
        if detection.auto_deny || state != TrustState::Authorized {
            Verdict::Deny
        } else if detection.signals.is_empty() {
            Verdict::Admit
        } else {
            Verdict::AdmitFlagged
        }
    }

    pub fn admitted(self) -> bool {
        !matches!(self, Verdict::Deny)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Admit => "admit",
            Verdict::AdmitFlagged => "admit_flagged",
            Verdict::Deny => "deny",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Signal;

    fn geo() -> DetectionResult {
        DetectionResult::from_signals(vec![Signal::GeoViolation {
            country: "KP".into(),
        }])
    }

    fn churn() -> DetectionResult {
        DetectionResult::from_signals(vec![Signal::IdentityChurn {
            fields: vec!["platform"],
        }])
    }

    fn banned() -> DetectionResult {
        DetectionResult::from_signals(vec![Signal::SourceBanned {
            ip: "192.0.2.1".parse().unwrap(),
        }])
    }

    #[test]
    fn clean_registration_authorizes_unknown() {
        let clean = DetectionResult::clean();
        assert_eq!(
            next_state(TrustState::Unknown, &clean, Mode::Full, false),
            TrustState::Authorized
        );
        assert_eq!(
            next_state(TrustState::Unknown, &clean, Mode::Heartbeat, false),
            TrustState::Unknown
        );
        assert_eq!(
            next_state(TrustState::PendingReview, &clean, Mode::Full, false),
            TrustState::PendingReview
        );
    }

    #[test]
    fn suspicion_moves_to_review_or_block() {
        for state in [TrustState::Unknown, TrustState::PendingReview, TrustState::Authorized] {
            assert_eq!(next_state(state, &geo(), Mode::Full, false), TrustState::PendingReview);
            assert_eq!(next_state(state, &geo(), Mode::Full, true), TrustState::Blocked);
            // Medium never hard-blocks.
            assert_eq!(next_state(state, &churn(), Mode::Full, true), TrustState::PendingReview);
        }
    }

    #[test]
    fn blocked_is_sticky_against_evaluation() {
        for detection in [DetectionResult::clean(), geo(), churn(), banned()] {
            for mode in [Mode::Full, Mode::Heartbeat] {
                assert_eq!(
                    next_state(TrustState::Blocked, &detection, mode, true),
                    TrustState::Blocked
                );
            }
        }
    }

    #[test]
    fn ban_alone_keeps_state_and_denies() {
        assert_eq!(
            next_state(TrustState::Authorized, &banned(), Mode::Full, true),
            TrustState::Authorized
        );
        assert_eq!(
            next_state(TrustState::Unknown, &banned(), Mode::Full, true),
            TrustState::Unknown
        );
        assert_eq!(Verdict::decide(TrustState::Authorized, &banned()), Verdict::Deny);
    }

    #[test]
    fn transition_events() {
        let system = Actor::System;
        let ops = Actor::Operator("ops".into());
        assert_eq!(
            transition_event(TrustState::Unknown, TrustState::Authorized, &system, Severity::Info),
            None
        );
        assert_eq!(
            transition_event(TrustState::Authorized, TrustState::PendingReview, &system, Severity::High),
            Some((EventType::SuspiciousDevice, Severity::High))
        );
        assert_eq!(
            transition_event(TrustState::PendingReview, TrustState::Blocked, &system, Severity::High),
            Some((EventType::DeviceBlocked, Severity::High))
        );
        assert_eq!(
            transition_event(TrustState::Blocked, TrustState::Blocked, &system, Severity::High),
            None
        );
        // Operators are always audited, even for a no-op.
        assert_eq!(
            transition_event(TrustState::Blocked, TrustState::Blocked, &ops, Severity::Info),
            Some((EventType::DeviceBlocked, Severity::Warning))
        );
        assert_eq!(
            transition_event(TrustState::Blocked, TrustState::Authorized, &ops, Severity::Info),
            Some((EventType::DeviceAuthorized, Severity::Info))
        );
    }

    #[test]
    fn verdicts() {
        let clean = DetectionResult::clean();
        let flagged = DetectionResult::from_signals(vec![Signal::NewDeviceForKnownUser {
            user_id: "alice".into(),
        }]);
        assert_eq!(Verdict::decide(TrustState::Authorized, &clean), Verdict::Admit);
        assert_eq!(Verdict::decide(TrustState::Authorized, &flagged), Verdict::AdmitFlagged);
        assert_eq!(Verdict::decide(TrustState::PendingReview, &clean), Verdict::Deny);
        assert_eq!(Verdict::decide(TrustState::Blocked, &clean), Verdict::Deny);
    }
}
