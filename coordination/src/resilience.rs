//! Resilience: retry policy arithmetic
//!
//! Pure description of how a failing call is retried: how many attempts are
//! allowed and how long to wait after each failure. The async executor that
//! actually sleeps lives with the callers; keeping the schedule here makes it
//! testable without a runtime.
//!
//! # Design
//!
//! ```text
//! attempt 1 ── fail ──► delay_after(1) ──► attempt 2 ── fail ──► delay_after(2) ...
//!                                                  │
//!   max_attempts = None    → never gives up        │
//!   max_attempts = Some(n) → stops after attempt n ┘
//! ```
//!
//! Exponential delays follow `min(initial * 2^min(failures, 6), cap)`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest exponent applied by exponential backoff.
pub const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed { delay_ms: u64 },
    /// Doubling delay, capped.
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { initial_ms, max_ms } => {
                let exponent = failures.min(MAX_BACKOFF_EXPONENT);
                let scaled = initial_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(scaled.min(max_ms))
            }
        }
    }
}

impl std::fmt::Display for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed { delay_ms } => write!(f, "fixed({delay_ms}ms)"),
            Self::Exponential { initial_ms, max_ms } => {
                write!(f, "exponential({initial_ms}ms..{max_ms}ms)")
            }
        }
    }
}

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Never give up, fixed delay.
    pub fn unbounded_fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    /// Never give up, exponential delay.
    pub fn unbounded_exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Exponential {
                initial_ms: initial.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            },
        }
    }

    /// Same schedule with an attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether another attempt may follow `attempts_made` failed attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempts_made < max,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }

    /// Delay after the `failures`-th consecutive failure.
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.backoff.delay_after(failures)
    }
}

impl Default for RetryPolicy {
    /// Never give up, 5 s between attempts.
    fn default() -> Self {
        Self::unbounded_fixed(Duration::from_secs(5))
    }
}

/// Running attempt bookkeeping for one retried call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptTracker {
    pub attempts: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_failure(&mut self, error: &str) {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
    }

    /// Delay to wait before the next attempt, or `None` when the policy is
    /// exhausted.
    pub fn next_delay(&self, policy: &RetryPolicy) -> Option<Duration> {
        if policy.allows_another(self.attempts) {
            Some(policy.delay_after(self.consecutive_failures.max(1)))
        } else {
            None
        }
    }
}
