//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Collaborator call (store, event log):
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On transient failure: retries.rs (one retry after backoff.rs delay)
//!     → Still failing: error surfaced to the engine
//! Geolocation:
//!     → timeouts.rs only (best-effort, never retried)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A single retry keeps the request path latency bounded

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{guarded, retry_once, Retryable};
pub use timeouts::{with_deadline, DeadlineExceeded};
