//! Logging setup and batch telemetry.
//!
//! Two output sinks per batch:
//! - the summary JSONL itself (written by the batch driver)
//! - `.dialogue-sim-telemetry.jsonl` next to it: append-only log of every
//!   batch run, one [`BatchMetrics`] object per line

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use coordination::batch::DistributionStats;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::prompts::PROMPT_VERSION;

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// With `log_file` set, events are additionally appended there without ANSI
/// colouring.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

/// Snapshot of one finished batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub label: String,
    pub model: String,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    /// Adjudications answered by keyword fallback, summed over the batch.
    pub fallback_decisions: u32,
    pub max_turn_exits: usize,
    pub distribution: DistributionStats,
    pub prompt_version: String,
    pub timestamp: String,
}

impl BatchMetrics {
    pub fn new(label: &str, model: &str, requested: usize) -> Self {
        Self {
            label: label.to_string(),
            model: model.to_string(),
            requested,
            succeeded: 0,
            failed: 0,
            elapsed_secs: 0.0,
            fallback_decisions: 0,
            max_turn_exits: 0,
            distribution: DistributionStats::default(),
            prompt_version: PROMPT_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.requested as f64
        }
    }
}

/// Append batch metrics as one JSONL line. Failures are logged, not raised.
pub fn append_telemetry(metrics: &BatchMetrics, path: &Path) {
    let json = match serde_json::to_string(metrics) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize telemetry: {e}");
            return;
        }
    };
    use std::io::Write;
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append telemetry: {e}");
            } else {
                info!(path = %path.display(), "Appended batch telemetry");
            }
        }
        Err(e) => warn!("Failed to open telemetry file: {e}"),
    }
}
