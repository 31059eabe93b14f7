//! Concurrent batch generation.
//!
//! ```text
//! plan_tasks ──▶ JoinSet (≤ workers in flight, Semaphore)
//!                  └─ DialogueSource::run(task) ──▶ full transcript file
//! join_next loop ──▶ BatchReport { succeeded, failed }
//! sort by id ──▶ summary JSONL, stats, telemetry line
//! ```
//!
//! Runs share only read-only configuration. A failed or panicking run is
//! recorded with its id and never aborts its siblings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coordination::batch::{DialogueTask, DistributionStats, FailedTask, SummaryRecord};
use coordination::dialogue::DialogueResult;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::AgentRuntime;
use crate::completion::CompletionService;
use crate::config::SimConfig;
use crate::errors::SimError;
use crate::orchestrator::DialogueOrchestrator;
use crate::telemetry::BatchMetrics;

/// Produces one finished dialogue for a planned task.
#[async_trait]
pub trait DialogueSource: Send + Sync {
    async fn generate(&self, task: &DialogueTask) -> Result<DialogueResult, SimError>;
}

/// Runs real dialogues against a completion service.
pub struct LiveDialogueSource {
    config: Arc<SimConfig>,
    completion: Arc<dyn CompletionService>,
    cancel: CancellationToken,
}

impl LiveDialogueSource {
    pub fn new(
        config: Arc<SimConfig>,
        completion: Arc<dyn CompletionService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            completion,
            cancel,
        }
    }
}

#[async_trait]
impl DialogueSource for LiveDialogueSource {
    async fn generate(&self, task: &DialogueTask) -> Result<DialogueResult, SimError> {
        let runtime =
            AgentRuntime::from_config(self.completion.clone(), &self.config, self.cancel.child_token());
        DialogueOrchestrator::for_task(task, &self.config, runtime)?
            .run(&task.id)
            .await
    }
}

/// Where per-dialogue transcripts go while the batch runs.
#[derive(Debug, Clone)]
pub struct TranscriptSink {
    dir: PathBuf,
}

impl TranscriptSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SimError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SimError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write `{dir}/{id}.json`, pretty-printed.
    pub async fn write(&self, result: &DialogueResult) -> Result<PathBuf, SimError> {
        let path = self.path_for(&result.id);
        let json = serde_json::to_string_pretty(result)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| SimError::io(&path, e))?;
        Ok(path)
    }
}

/// Outcome of one worker.
struct TaskOutcome {
    task: DialogueTask,
    result: Result<DialogueResult, SimError>,
    elapsed: Duration,
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful runs, sorted by dialogue id.
    pub succeeded: Vec<(DialogueTask, DialogueResult)>,
    /// Failed runs, sorted by dialogue id.
    pub failed: Vec<FailedTask>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }

    pub fn records(&self) -> Vec<SummaryRecord> {
        self.succeeded
            .iter()
            .map(|(task, result)| SummaryRecord::new(task, result))
            .collect()
    }

    pub fn stats(&self) -> DistributionStats {
        DistributionStats::from_records(&self.records())
    }

    pub fn metrics(&self, label: &str, model: &str) -> BatchMetrics {
        let mut metrics = BatchMetrics::new(label, model, self.success_count() + self.error_count());
        metrics.succeeded = self.success_count();
        metrics.failed = self.error_count();
        metrics.elapsed_secs = self.elapsed.as_secs_f64();
        metrics.fallback_decisions = self
            .succeeded
            .iter()
            .map(|(_, r)| r.fallback_decisions)
            .sum();
        metrics.max_turn_exits = self
            .succeeded
            .iter()
            .filter(|(_, r)| r.reached_max_turns)
            .count();
        metrics.distribution = self.stats();
        metrics
    }
}

/// Run every task with at most `workers` dialogues in flight.
///
/// When `sink` is set each successful transcript is written as soon as its
/// run ends; a failed write fails that task.
pub async fn run_batch(
    source: Arc<dyn DialogueSource>,
    tasks: Vec<DialogueTask>,
    workers: usize,
    sink: Option<TranscriptSink>,
) -> BatchReport {
    let started = Instant::now();
    let total = tasks.len();
    let sem = Arc::new(Semaphore::new(workers.max(1)));
    let sink = sink.map(Arc::new);
    let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
    // Ids kept outside the futures so an aborted task can still be reported.
    let mut pending: HashMap<task::Id, String> = HashMap::with_capacity(total);

    info!(total, workers, "Starting batch");
    for task in tasks {
        let sem = sem.clone();
        let source = source.clone();
        let sink = sink.clone();
        let tts_id = task.id.clone();

        let handle = join_set.spawn(async move {
            let start = Instant::now();
            let result = match sem.acquire_owned().await {
                Ok(_permit) => run_one(source, sink, task.clone()).await,
                Err(_) => Err(SimError::Cancelled("worker pool closed".into())),
            };
            TaskOutcome {
                task,
                result,
                elapsed: start.elapsed(),
            }
        });
        pending.insert(handle.id(), tts_id);
    }

    let mut report = BatchReport::default();
    let mut done = 0usize;
    while let Some(joined) = join_set.join_next_with_id().await {
        done += 1;
        settle(&mut report, &mut pending, joined, done, total);
    }

    report.succeeded.sort_by(|a, b| a.0.id.cmp(&b.0.id));
    report.failed.sort_by(|a, b| a.tts_id.cmp(&b.tts_id));
    report.elapsed = started.elapsed();
    report
}

/// File one joined task under `succeeded` or `failed`.
fn settle(
    report: &mut BatchReport,
    pending: &mut HashMap<task::Id, String>,
    joined: Result<(task::Id, TaskOutcome), JoinError>,
    done: usize,
    total: usize,
) {
    match joined {
        Ok((
            id,
            TaskOutcome {
                task,
                result: Ok(result),
                elapsed,
            },
        )) => {
            pending.remove(&id);
            info!(
                id = %task.id,
                done,
                total,
                elapsed_ms = elapsed.as_millis() as u64,
                reason = %result.summary_reason(),
                "Dialogue complete"
            );
            report.succeeded.push((task, result));
        }
        Ok((
            id,
            TaskOutcome {
                task,
                result: Err(e),
                ..
            },
        )) => {
            pending.remove(&id);
            error!(id = %task.id, done, total, error = %e, "Dialogue failed");
            report.failed.push(FailedTask {
                tts_id: task.id,
                error: e.to_string(),
            });
        }
        Err(e) => {
            // run_one already contains panics; this is a runtime shutdown.
            let tts_id = pending.remove(&e.id()).unwrap_or_default();
            warn!(id = %tts_id, done, total, error = %e, "Batch worker aborted");
            report.failed.push(FailedTask {
                tts_id,
                error: format!("worker aborted: {e}"),
            });
        }
    }
}

/// Run one task in its own task so a panic is reported against its id.
async fn run_one(
    source: Arc<dyn DialogueSource>,
    sink: Option<Arc<TranscriptSink>>,
    task: DialogueTask,
) -> Result<DialogueResult, SimError> {
    let handle = tokio::spawn(async move {
        let result = source.generate(&task).await?;
        if let Some(sink) = sink {
            let path = sink.write(&result).await?;
            debug!(id = %result.id, path = %path.display(), "Wrote full transcript");
        }
        Ok(result)
    });
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(SimError::Internal(anyhow::anyhow!("worker panicked"))),
        Err(e) => Err(SimError::Cancelled(e.to_string())),
    }
}

/// Write one summary record per successful dialogue, in id order.
pub fn write_summary(path: &Path, records: &[SummaryRecord]) -> Result<(), SimError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SimError::io(parent, e))?;
    }
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    std::fs::write(path, out).map_err(|e| SimError::io(path, e))
}

/// Read a summary JSONL file back.
pub fn read_summary(path: &Path) -> Result<Vec<SummaryRecord>, SimError> {
    let text = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SimError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;
    use coordination::batch::{plan_tasks, DialogueLabel, PersonaSpace};
    use coordination::dialogue::{Speaker, Terminator, Transcript};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    /// Fails for the listed ids, succeeds with a two-line call otherwise.
    struct CannedSource {
        failing: HashSet<String>,
    }

    #[async_trait]
    impl DialogueSource for CannedSource {
        async fn generate(&self, task: &DialogueTask) -> Result<DialogueResult, SimError> {
            tokio::task::yield_now().await;
            if self.failing.contains(&task.id) {
                return Err(SimError::RetriesExhausted {
                    label: "responder".into(),
                    attempts: 3,
                    last: "HTTP 500".into(),
                });
            }
            let mut history = Transcript::new();
            history.push(Speaker::Initiator, format!("Opening for {}", task.id));
            history.push(Speaker::Responder, "Not interested.");
            Ok(DialogueResult {
                id: task.id.clone(),
                history,
                turn_count: 1,
                terminated_by_manager: true,
                end_call_signal_detected: false,
                termination_reason: "Callee refused.".into(),
                terminator: Terminator::Responder,
                conclusion_messages: Vec::new(),
                reached_max_turns: false,
                fallback_decisions: 1,
                started_at: Utc::now(),
                finished_at: Utc::now(),
            })
        }
    }

    fn tasks(count: usize) -> Vec<DialogueTask> {
        let space = PersonaSpace::for_label(DialogueLabel::Fraud);
        plan_tasks(&space, DialogueLabel::Fraud, count, &mut StdRng::seed_from_u64(7)).unwrap()
    }

    #[tokio::test]
    async fn failures_are_isolated_and_outputs_written() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CannedSource {
            failing: ["tts_fraud_00003", "tts_fraud_00008"]
                .into_iter()
                .map(String::from)
                .collect(),
        });
        let sink = TranscriptSink::new(dir.path().join("full")).unwrap();

        let report = run_batch(source, tasks(10), 3, Some(sink.clone())).await;

        assert_eq!(report.success_count(), 8);
        assert_eq!(report.error_count(), 2);
        assert_eq!(report.failed[0].tts_id, "tts_fraud_00003");
        assert!(report.failed[0].error.contains("gave up after 3 attempts"));

        let ids: Vec<&str> = report.succeeded.iter().map(|(t, _)| t.id.as_str()).collect();
        let distinct: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 8);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(sink.path_for("tts_fraud_00001").exists());
        assert!(!sink.path_for("tts_fraud_00003").exists());

        let summary = dir.path().join("out/dialogues.jsonl");
        write_summary(&summary, &report.records()).unwrap();
        let back = read_summary(&summary).unwrap();
        assert_eq!(back.len(), 8);
        assert_eq!(back[0].right, vec!["Not interested."]);

        let metrics = report.metrics("fraud", "gpt-4o-mini");
        assert_eq!(metrics.requested, 10);
        assert_eq!(metrics.fallback_decisions, 8);
        assert_eq!(metrics.distribution.by_terminator["right"], 8);
    }

    #[tokio::test]
    async fn single_worker_still_completes_everything() {
        let source = Arc::new(CannedSource {
            failing: HashSet::new(),
        });
        let report = run_batch(source, tasks(5), 1, None).await;
        assert_eq!(report.success_count(), 5);
        assert_eq!(report.error_count(), 0);
    }

    struct PanickingSource;

    #[async_trait]
    impl DialogueSource for PanickingSource {
        async fn generate(&self, task: &DialogueTask) -> Result<DialogueResult, SimError> {
            panic!("boom in {}", task.id);
        }
    }

    #[tokio::test]
    async fn panics_are_recorded_against_their_task() {
        let report = run_batch(Arc::new(PanickingSource), tasks(2), 2, None).await;
        assert_eq!(report.error_count(), 2);
        assert!(report.failed.iter().all(|f| f.error.contains("panicked")));
    }

    #[tokio::test]
    async fn aborted_worker_counts_as_failed() {
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
        let handle = join_set.spawn(std::future::pending::<TaskOutcome>());
        let mut pending = HashMap::from([(handle.id(), "tts_fraud_00004".to_string())]);
        handle.abort();

        let joined = join_set.join_next_with_id().await.unwrap();
        let mut report = BatchReport::default();
        settle(&mut report, &mut pending, joined, 1, 1);

        assert_eq!(report.success_count() + report.error_count(), 1);
        assert_eq!(report.failed[0].tts_id, "tts_fraud_00004");
        assert!(report.failed[0].error.contains("worker aborted"));
        assert!(pending.is_empty());
    }
}
