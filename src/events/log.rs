//! Append-only security event log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::events::types::{EventFilter, NewSecurityEvent, SecurityEvent};
use crate::resilience::{DeadlineExceeded, Retryable};

/// Hard ceiling on the number of events a single query returns.
pub const MAX_QUERY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Error)]
pub enum LogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for LogError {
    fn is_transient(&self) -> bool {
        true
    }
}

impl From<DeadlineExceeded> for LogError {
    fn from(err: DeadlineExceeded) -> Self {
        LogError::Unavailable(err.to_string())
    }
}

/// Persistence for security events.
///
/// Implementations must never mutate or drop appended events, and `append`
/// must report failure rather than lose an event silently.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event, assigning its id and timestamp.
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, LogError>;

    /// Matching events, most recent first, at most `limit` (itself capped at
    /// [`MAX_QUERY_LIMIT`]).
    async fn query(&self, filter: &EventFilter, limit: usize) -> Result<Vec<SecurityEvent>, LogError>;

    async fn count(&self) -> Result<usize, LogError>;
}

pub type SharedEventLog = Arc<dyn EventLog>;

struct LogInner {
    events: Vec<SecurityEvent>,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// In-process event log.
pub struct MemoryEventLog {
    inner: RwLock<LogInner>,
    clock: SharedClock,
}

impl MemoryEventLog {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(LogInner {
                events: Vec::new(),
                next_id: 1,
                last_timestamp: None,
            }),
            clock,
        }
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: NewSecurityEvent) -> Result<SecurityEvent, LogError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        // Strictly increasing even when the clock stalls or steps back.
        let timestamp = match inner.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        let id = inner.next_id;
        inner.next_id += 1;
        inner.last_timestamp = Some(timestamp);

        let recorded = SecurityEvent {
            id,
            event_type: event.event_type,
            device_id: event.device_id,
            user_id: event.user_id,
            source_ip: event.source_ip,
            severity: event.severity,
            details: event.details,
            timestamp,
        };
        inner.events.push(recorded.clone());
        Ok(recorded)
    }

    async fn query(&self, filter: &EventFilter, limit: usize) -> Result<Vec<SecurityEvent>, LogError> {
        let limit = limit.min(MAX_QUERY_LIMIT);
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, LogError> {
        Ok(self.inner.read().events.len())
    }
}
