//! Anomaly detection.
//!
//! # Rules (fixed precedence)
//! ```text
//! a. geo violation          → high    (full mode)
//! b. device-count violation → medium  (full mode)
//! c. identity churn         → medium
//! d. source banned          → high, auto-deny
//! e. new device, known user → info, notify only (full mode)
//! ```
//!
//! # Design Decisions
//! - Pure: inputs are a record, a request context and a policy snapshot
//! - Disabled device tracking leaves only rule d

pub mod rules;
pub mod signals;

pub use rules::{Detector, Mode, RequestContext};
pub use signals::{DetectionResult, Signal};
