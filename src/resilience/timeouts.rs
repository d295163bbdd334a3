//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap every collaborator call (store, event log, geolocation) with a deadline
//! - Cancel the call cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors until the adapter maps them

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} exceeded its {limit:?} deadline")]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Run `fut` for at most `limit`.
pub async fn with_deadline<F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineExceeded { operation, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let value = with_deadline("fast", Duration::from_millis(50), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let err = with_deadline("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await
        .unwrap_err();
        assert_eq!(err.operation, "slow");
    }
}
