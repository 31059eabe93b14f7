//! Retry executor driven by a [`RetryPolicy`].
//!
//! ```text
//! loop:
//!   cancelled?            → Cancelled
//!   op(attempt)           → Ok: return
//!   non-retriable error   → return it
//!   policy exhausted      → RetriesExhausted
//!   sleep(delay) | cancel → Cancelled if the token fires first
//! ```

use std::future::Future;

use coordination::resilience::{AttemptTracker, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::SimError;

/// Run `op` until it succeeds, fails terminally, or `policy` runs out.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, SimError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SimError>>,
{
    let mut tracker = AttemptTracker::new();
    loop {
        if cancel.is_cancelled() {
            return Err(SimError::Cancelled(format!("{label}: cancelled")));
        }

        tracker.record_attempt();
        let err = match op(tracker.attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_retriable() {
            return Err(err);
        }
        tracker.record_failure(&err.to_string());

        let Some(delay) = tracker.next_delay(policy) else {
            return Err(SimError::RetriesExhausted {
                label: label.to_string(),
                attempts: tracker.attempts,
                last: err.to_string(),
            });
        };

        warn!(
            label,
            attempt = tracker.attempts,
            category = %err.retry_category(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Call failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SimError::Cancelled(format!(
                    "{label}: cancelled while waiting to retry"
                )));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
