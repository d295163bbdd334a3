//! Trust decisions.
//!
//! `state.rs` holds the pure state machine; `engine.rs` drives it against
//! the store, the event log, the ban counter and geolocation.

pub mod engine;
pub mod state;

pub use engine::{ban_key, Collaborators, Decision, EngineSettings, EngineStats, TrustEngine};
pub use state::{next_state, transition_event, OperatorAction, Verdict};
