//! Device identity model.
//!
//! # Responsibilities
//! - Define the persisted [`DeviceRecord`] and its trust lifecycle
//! - Define the client payloads and validate them at the boundary
//!
//! # Design Decisions
//! - `device_id` is immutable once created; merges never touch it
//! - Trust fields are only written through the store's state API, never by
//!   a descriptive merge

pub mod types;
pub mod validation;

pub use types::{
    Actor, ClientAttributes, ConnectionProfile, DeviceRecord, DeviceSnapshot, Fingerprint, Location,
    ReportedPosition, ScreenResolution, TrustState,
};
pub use validation::{
    validate_device_id, DeviceInfo, Heartbeat, HeartbeatRequest, Registration, ValidationError,
};
