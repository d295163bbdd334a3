//! Security event log.
//!
//! # Responsibilities
//! - Define security event types and severities
//! - Append-only storage with most-recent-first queries
//! - Validate client-reported events
//!
//! # Design Decisions
//! - The log assigns ids and timestamps; callers never do
//! - Query limits are clamped by the log itself as well as by the engine

pub mod log;
pub mod report;
pub mod types;

pub use log::{EventLog, LogError, MemoryEventLog, SharedEventLog, MAX_QUERY_LIMIT};
pub use report::SecurityReport;
pub use types::{EventFilter, EventType, NewSecurityEvent, SecurityEvent, Severity};
