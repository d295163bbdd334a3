//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an adapter failure is worth retrying
//! - Retry exactly once, after a jittered backoff
//!
//! # Design Decisions
//! - One retry only; beyond that the failure is surfaced to the engine
//! - Not-found and conflict outcomes are answers, not failures, and are
//!   never retried

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::{with_deadline, DeadlineExceeded};

/// Errors that can tell whether a second attempt might succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Run `call`, retrying once on a transient error.
pub async fn retry_once<T, E, F, Fut>(policy: &RetryConfig, operation: &'static str, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    match call().await {
        Err(err) if policy.enabled && err.is_transient() => {
            let delay = calculate_backoff(1, policy.base_delay_ms, policy.max_delay_ms);
            tracing::warn!(
                operation,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying once"
            );
            tokio::time::sleep(delay).await;
            call().await
        }
        outcome => outcome,
    }
}

/// Deadline per attempt plus a single retry: the standard wrapper for every
/// store and event-log call.
pub async fn guarded<T, E, F, Fut>(
    policy: &RetryConfig,
    operation: &'static str,
    limit: Duration,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display + From<DeadlineExceeded>,
{
    retry_once(policy, operation, || {
        let attempt = with_deadline(operation, limit, call());
        async move { attempt.await.unwrap_or_else(|elapsed| Err(E::from(elapsed))) }
    })
    .await
}
