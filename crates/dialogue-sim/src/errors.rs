//! Simulator error taxonomy with retry classification.
//!
//! Every error raised by completion calls, agents, the orchestrator, the
//! speech client and the audio merge is represented here. Retry loops query
//! `retry_category()` instead of matching on message text.
//!
//! ## Retry categories
//!
//! | Category      | Retriable | Raised by |
//! |---------------|-----------|-----------|
//! | Transient     | yes       | transport, HTTP status, malformed body, fallback exhausted |
//! | SoftFailure   | yes       | failure sentinel found in a reply |
//! | Timeout       | yes       | request timeout |
//! | Exhausted     | no        | retry ceiling reached |
//! | Cancelled     | no        | cancellation token fired |
//! | Configuration | no        | invalid settings |
//! | Io            | no        | file system, audio files |
//! | Internal      | no        | anything else |

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classification used by retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network, backend or decoding failure. Safe to retry.
    Transient,
    /// The call succeeded but the reply signals an upstream failure.
    SoftFailure,
    /// The request did not complete in time.
    Timeout,
    /// A bounded retry policy ran out of attempts.
    Exhausted,
    /// Explicitly cancelled.
    Cancelled,
    /// Settings are invalid; retrying cannot help.
    Configuration,
    /// Local file or media failure.
    Io,
    /// Unexpected internal error.
    Internal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::SoftFailure | Self::Timeout)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::SoftFailure => write!(f, "soft_failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Configuration => write!(f, "configuration"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type of the simulator runtime.
#[derive(Debug, Error)]
pub enum SimError {
    // ── Retriable ─────────────────────────────────────────────────────────
    /// Completion request failed (network, HTTP status, malformed body).
    #[error("Completion failure [{model}]: {message}")]
    Completion { model: String, message: String },

    /// Reply contained a failure sentinel.
    #[error("Failure sentinel in reply: {marker}")]
    Sentinel { marker: String },

    /// Primary and fallback models both failed for one call.
    #[error("Completion failed on primary and fallback: primary error: {primary}, fallback error: {fallback}")]
    FallbackExhausted { primary: String, fallback: String },

    /// Request timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Speech render service failure.
    #[error("Speech render failure: {0}")]
    Speech(String),

    /// Render service returned an unreadable archive.
    #[error("Invalid audio archive: {0}")]
    Archive(String),

    // ── Non-retriable ─────────────────────────────────────────────────────
    /// A bounded retry policy gave up.
    #[error("{label}: gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        last: String,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// WAV read/write failure or incompatible clips.
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SimError {
    /// Classify this error for retry logic.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Completion { .. }
            | Self::FallbackExhausted { .. }
            | Self::Speech(_)
            | Self::Archive(_) => RetryCategory::Transient,
            Self::Sentinel { .. } => RetryCategory::SoftFailure,
            Self::Timeout(_) => RetryCategory::Timeout,
            Self::RetriesExhausted { .. } => RetryCategory::Exhausted,
            Self::Cancelled(_) => RetryCategory::Cancelled,
            Self::Configuration(_) => RetryCategory::Configuration,
            Self::Io { .. } | Self::Audio(_) => RetryCategory::Io,
            Self::Json(_) | Self::Internal(_) => RetryCategory::Internal,
        }
    }

    /// Returns `true` if a retry loop may try again after this error.
    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn completion(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Completion {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a reqwest error, keeping timeouts distinguishable.
    pub fn from_http(model: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{model}: {err}"))
        } else {
            Self::completion(model, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_failure_is_retriable() {
        let err = SimError::completion("gpt-4o", "connection reset");
        assert!(err.is_retriable());
        assert_eq!(err.retry_category(), RetryCategory::Transient);
        assert_eq!(err.to_string(), "Completion failure [gpt-4o]: connection reset");
    }

    #[test]
    fn sentinel_is_soft_failure() {
        let err = SimError::Sentinel {
            marker: "API call failed".into(),
        };
        assert!(err.is_retriable());
        assert_eq!(err.retry_category().to_string(), "soft_failure");
    }

    #[test]
    fn fallback_exhausted_is_retriable_by_agents() {
        let err = SimError::FallbackExhausted {
            primary: "503".into(),
            fallback: "timeout".into(),
        };
        assert!(err.is_retriable());
        assert!(err.to_string().contains("primary error: 503"));
    }

    #[test]
    fn terminal_categories() {
        assert!(!SimError::Cancelled("shutdown".into()).is_retriable());
        assert!(!SimError::Configuration("no model".into()).is_retriable());
        let err = SimError::RetriesExhausted {
            label: "responder".into(),
            attempts: 3,
            last: "boom".into(),
        };
        assert_eq!(err.retry_category(), RetryCategory::Exhausted);
        assert_eq!(
            err.to_string(),
            "responder: gave up after 3 attempts, last error: boom"
        );
    }

    #[test]
    fn io_error_carries_path() {
        let err = SimError::io(
            "/tmp/out.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("/tmp/out.jsonl"));
    }
}
