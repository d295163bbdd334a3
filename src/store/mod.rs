//! Device record store adapter.
//!
//! # Responsibilities
//! - Typed read/write access to persisted device identity
//! - Per-device linearizable merges, touches and trust-state writes
//!
//! # Data Flow
//! ```text
//! register → upsert(snapshot)           (descriptive merge, never trust)
//!          → set_trust_state(CAS)       (trust, guarded by state_version)
//! heartbeat → touch_last_seen(ts)       (forward-only)
//! ```
//!
//! # Design Decisions
//! - Descriptive merges and trust writes are separate operations, so an
//!   info-only update can never clobber a concurrent transition
//! - Automated transitions pass the version they evaluated against and get
//!   `Conflict` if the record moved underneath them

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::device::{Actor, DeviceRecord, DeviceSnapshot, TrustState};
use crate::resilience::{DeadlineExceeded, Retryable};

pub use memory::MemoryDeviceStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("device `{0}` not found")]
    NotFound(String),

    /// A trust-state write raced another one.
    #[error("device `{device_id}` changed underneath: expected version {expected}, found {actual}")]
    Conflict {
        device_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("device store unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for StoreError {
    /// Infrastructure failures are worth one retry; answers are not.
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DeadlineExceeded> for StoreError {
    fn from(err: DeadlineExceeded) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result of merging a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The record after the merge.
    pub record: DeviceRecord,
    /// The record before the merge; `None` when this call created it.
    pub previous: Option<DeviceRecord>,
}

impl UpsertOutcome {
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }
}

/// Result of a `touch_last_seen`.
#[derive(Debug, Clone, PartialEq)]
pub enum Touch {
    /// `last_seen` moved forward.
    Advanced {
        record: DeviceRecord,
        previous_last_seen: DateTime<Utc>,
    },
    /// The timestamp was not newer; nothing changed.
    Stale(DeviceRecord),
}

impl Touch {
    pub fn record(&self) -> &DeviceRecord {
        match self {
            Touch::Advanced { record, .. } | Touch::Stale(record) => record,
        }
    }
}

/// A requested trust-state write.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub device_id: String,
    /// `Some` for compare-and-swap, `None` for an unconditional write.
    pub expected_version: Option<u64>,
    pub state: TrustState,
    pub actor: Actor,
}

/// A committed trust-state write.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub previous: TrustState,
    pub record: DeviceRecord,
}

/// Registry counts for the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub unknown: usize,
    pub pending_review: usize,
    pub authorized: usize,
    pub blocked: usize,
}

impl StoreStats {
    pub fn add(&mut self, state: TrustState) {
        self.total += 1;
        match state {
            TrustState::Unknown => self.unknown += 1,
            TrustState::PendingReview => self.pending_review += 1,
            TrustState::Authorized => self.authorized += 1,
            TrustState::Blocked => self.blocked += 1,
        }
    }
}

/// Persistence for device records.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Create the record or merge the snapshot into it.
    async fn upsert(&self, snapshot: DeviceSnapshot) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, device_id: &str) -> Result<DeviceRecord, StoreError>;

    async fn set_trust_state(&self, change: StateChange) -> Result<StateUpdate, StoreError>;

    /// Advance `last_seen` to `at` if it is newer.
    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<Touch, StoreError>;

    async fn devices_for_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

pub type SharedDeviceStore = Arc<dyn DeviceStore>;
