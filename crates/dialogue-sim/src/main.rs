//! `dialogue-sim` command line.
//!
//! ```bash
//! # 40 fraud calls, 8 at a time, reproducible personas
//! dialogue-sim generate --count 40 --workers 8 --seed 7
//!
//! # One everyday call, printed as it ends
//! dialogue-sim converse --label normal --category "bank account inquiry" --age 67
//!
//! # Speech clips for a summary file, then stereo tracks
//! dialogue-sim render --summary fraud_dialogues.jsonl --out-dir tts_output
//! dialogue-sim merge --clips-dir tts_output --out-dir merged_output
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use coordination::batch::{
    plan_tasks, AgeBracket, Awareness, DialogueLabel, DialogueTask, PersonaSpace, AGE_BRACKETS,
};
use dialogue_sim::agents::AgentRuntime;
use dialogue_sim::audio_merge::{merge_all, MergeOutcome};
use dialogue_sim::batch::{read_summary, run_batch, write_summary, LiveDialogueSource, TranscriptSink};
use dialogue_sim::completion::{
    CompletionService, FallbackCompletion, OpenAiCompatClient, SentinelPolicy,
};
use dialogue_sim::config::{check_endpoint, SimConfig, Strictness};
use dialogue_sim::orchestrator::DialogueOrchestrator;
use dialogue_sim::speech::{render_all, HttpSpeechService, SpeechRenderer};
use dialogue_sim::telemetry::{append_telemetry, init_tracing};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (overrides DIALOGUE_SIM_* environment values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also append log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a batch of dialogues over the persona space
    Generate(GenerateArgs),
    /// Run a single dialogue with an explicit persona
    Converse(ConverseArgs),
    /// Render summary records to per-line speech clips
    Render(RenderArgs),
    /// Merge rendered clips into stereo tracks
    Merge(MergeArgs),
}

/// Model and dialogue overrides shared by `generate` and `converse`.
#[derive(Args, Debug)]
struct DialogueOverrides {
    /// fraud | normal
    #[arg(long)]
    label: Option<DialogueLabel>,

    #[arg(long)]
    max_turns: Option<u32>,

    #[arg(long, value_enum)]
    strictness: Option<Strictness>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    fallback_model: Option<String>,

    /// Disable the fallback model entirely
    #[arg(long, default_value_t = false)]
    no_fallback: bool,

    /// Give up on a completion after this many attempts (default: never)
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl DialogueOverrides {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(label) = self.label {
            config.dialogue.label = label;
        }
        if let Some(max_turns) = self.max_turns {
            config.dialogue.max_turns = max_turns;
        }
        if let Some(strictness) = self.strictness {
            config.dialogue.strictness = strictness;
        }
        if let Some(model) = &self.model {
            config.endpoint.model = model.clone();
        }
        if let Some(fallback) = &self.fallback_model {
            config.endpoint.fallback_model = Some(fallback.clone());
        }
        if self.no_fallback {
            config.endpoint.fallback_model = None;
        }
        if self.max_attempts.is_some() {
            config.retry.max_attempts = self.max_attempts;
        }
    }
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    dialogue: DialogueOverrides,

    /// Number of dialogues
    #[arg(long)]
    count: Option<usize>,

    /// Dialogues generated concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for persona planning
    #[arg(long)]
    seed: Option<u64>,

    /// Summary JSONL path (defaults to `<label>_dialogues.jsonl`)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory for full transcripts
    #[arg(long)]
    full_output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConverseArgs {
    #[command(flatten)]
    dialogue: DialogueOverrides,

    /// Scenario category (defaults to the first category of the label)
    #[arg(long)]
    category: Option<String>,

    #[arg(long, default_value_t = 35)]
    age: u8,

    /// low | medium | high
    #[arg(long, default_value = "medium")]
    awareness: Awareness,

    #[arg(long, default_value = "office worker")]
    occupation: String,

    /// Use this as the initiator's first line instead of generating one
    #[arg(long)]
    opening: Option<String>,

    /// Full transcript output
    #[arg(long, default_value = "dialogue.json")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Summary JSONL (defaults to the configured output or `<label>_dialogues.jsonl`)
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long, default_value = "tts_output")]
    out_dir: PathBuf,

    /// Speech service root URL
    #[arg(long)]
    base_url: Option<String>,

    /// Dialogues rendered concurrently
    #[arg(long)]
    concurrent_limit: Option<usize>,

    /// Space out characters before rendering
    #[arg(long, default_value_t = false)]
    space_characters: bool,

    /// Skip polling the status endpoint before starting
    #[arg(long, default_value_t = false)]
    no_wait: bool,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Directory holding `{tts_id}/{left,right}/{i}.wav`
    #[arg(long, default_value = "tts_output")]
    clips_dir: PathBuf,

    /// Full transcript directory (defaults to the configured one)
    #[arg(long)]
    transcripts_dir: Option<PathBuf>,

    #[arg(long, default_value = "merged_output")]
    out_dir: PathBuf,

    /// Parallel merge jobs (default: available cores)
    #[arg(long)]
    workers: Option<usize>,
}

/// Max turns for `converse` when neither the CLI nor a config file sets one.
const CONVERSE_MAX_TURNS: u32 = 20;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let mut config = SimConfig::load(cli.config.as_deref())?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Command::Generate(args) => {
            args.dialogue.apply(&mut config);
            if let Some(count) = args.count {
                config.batch.count = count;
            }
            if let Some(workers) = args.workers {
                config.batch.workers = workers;
            }
            if args.seed.is_some() {
                config.batch.seed = args.seed;
            }
            if let Some(output) = args.output {
                config.batch.output = Some(output);
            }
            if let Some(dir) = args.full_output_dir {
                config.batch.full_output_dir = dir;
            }
            validate(&config)?;
            generate(config, cancel).await
        }
        Command::Converse(args) => {
            if cli.config.is_none() {
                config.dialogue.max_turns = CONVERSE_MAX_TURNS;
            }
            args.dialogue.apply(&mut config);
            validate(&config)?;
            converse(config, args, cancel).await
        }
        Command::Render(args) => {
            if let Some(url) = args.base_url.clone() {
                config.speech.base_url = url;
            }
            if let Some(limit) = args.concurrent_limit {
                config.speech.concurrent_limit = limit;
            }
            if args.space_characters {
                config.speech.space_characters = true;
            }
            validate(&config)?;
            render(config, args, cancel).await
        }
        Command::Merge(args) => merge(config, args).await,
    }
}

fn validate(config: &SimConfig) -> Result<()> {
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }
    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight work");
            cancel.cancel();
        }
    });
}

fn build_completion(config: &SimConfig) -> Result<Arc<dyn CompletionService>> {
    let client = OpenAiCompatClient::new(&config.endpoint)?;
    Ok(Arc::new(FallbackCompletion::new(
        client,
        config.endpoint.fallback_model.clone(),
        SentinelPolicy::new(config.sentinels.iter().cloned()),
    )))
}

async fn preflight(config: &SimConfig) {
    let key = Some(config.endpoint.api_key.as_str());
    if !check_endpoint(&config.endpoint.base_url, key).await {
        warn!(
            url = %config.endpoint.base_url,
            "Completion endpoint did not answer GET /models; continuing anyway"
        );
    }
}

async fn generate(config: SimConfig, cancel: CancellationToken) -> Result<()> {
    preflight(&config).await;
    let label = config.dialogue.label;
    let mut rng = match config.batch.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let tasks = plan_tasks(
        &PersonaSpace::for_label(label),
        label,
        config.batch.count,
        &mut rng,
    )?;
    info!(
        label = %label,
        count = tasks.len(),
        workers = config.batch.workers,
        model = %config.endpoint.model,
        "Planned batch"
    );

    let completion = build_completion(&config)?;
    let sink = TranscriptSink::new(&config.batch.full_output_dir)?;
    let workers = config.batch.workers;
    let config = Arc::new(config);
    let source = Arc::new(LiveDialogueSource::new(config.clone(), completion, cancel));

    let report = run_batch(source, tasks, workers, Some(sink)).await;
    for failed in &report.failed {
        error!(id = %failed.tts_id, error = %failed.error, "Dialogue failed");
    }

    let records = report.records();
    let summary = config.summary_path();
    write_summary(&summary, &records)?;
    let metrics = report.metrics(label.as_str(), &config.endpoint.model);
    println!("{}", report.stats().render());
    println!(
        "Generated {} dialogues ({} failed, {:.0}% success) in {:.1}s -> {}",
        report.success_count(),
        report.error_count(),
        metrics.success_rate() * 100.0,
        report.elapsed.as_secs_f64(),
        summary.display()
    );

    append_telemetry(&metrics, &config.telemetry_path());
    Ok(())
}

async fn converse(config: SimConfig, args: ConverseArgs, cancel: CancellationToken) -> Result<()> {
    preflight(&config).await;
    let label = config.dialogue.label;
    let category = match args.category {
        Some(category) => category,
        None => label
            .categories()
            .first()
            .map(|c| c.to_string())
            .context("label has no categories")?,
    };
    let age_bracket = AGE_BRACKETS
        .iter()
        .copied()
        .find(|b| b.contains(args.age))
        .unwrap_or(AgeBracket::new(args.age, args.age));
    let task = DialogueTask {
        id: label.dialogue_id(1),
        label,
        age_bracket,
        user_age: args.age,
        awareness: args.awareness,
        category,
        occupation: args.occupation,
    };

    let completion = build_completion(&config)?;
    let runtime = AgentRuntime::from_config(completion, &config, cancel);
    let mut orchestrator = DialogueOrchestrator::for_task(&task, &config, runtime)?;
    if let Some(opening) = args.opening {
        orchestrator = orchestrator.with_opening_line(opening);
    }
    let result = orchestrator.run(&task.id).await?;

    for utterance in result.history.utterances() {
        println!("{}: {}", utterance.role.side(), utterance.content);
    }
    println!("{}", result.summary_line());
    println!("reason: {}", result.termination_reason);

    let json = serde_json::to_string_pretty(&result)?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(path = %args.output.display(), "Transcript written");
    Ok(())
}

async fn render(config: SimConfig, args: RenderArgs, cancel: CancellationToken) -> Result<()> {
    let summary = args.summary.unwrap_or_else(|| config.summary_path());
    let records = read_summary(&summary)?;
    info!(records = records.len(), summary = %summary.display(), "Rendering speech");

    let service = Arc::new(HttpSpeechService::new(&config.speech)?);
    let renderer = Arc::new(SpeechRenderer::new(service, config.speech.clone(), cancel));
    if !args.no_wait {
        renderer.wait_until_ready().await?;
    }

    let results = render_all(renderer, records, args.out_dir.clone()).await;
    let mut failed = 0usize;
    let mut written = 0usize;
    for result in &results {
        match result {
            Ok(outcome) => written += outcome.written,
            Err(e) => {
                failed += 1;
                error!(error = %e, "Dialogue render failed");
            }
        }
    }
    println!(
        "Rendered {} clips for {} dialogues ({} failed) -> {}",
        written,
        results.len() - failed,
        failed,
        args.out_dir.display()
    );
    Ok(())
}

async fn merge(config: SimConfig, args: MergeArgs) -> Result<()> {
    let transcripts = args
        .transcripts_dir
        .unwrap_or_else(|| config.batch.full_output_dir.clone());
    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let reports = merge_all(
        &args.clips_dir,
        &transcripts,
        &args.out_dir,
        SentinelPolicy::new(config.sentinels.iter().cloned()),
        workers,
    )
    .await?;

    let merged = reports
        .iter()
        .filter(|r| matches!(r.result, Ok(MergeOutcome::Merged { .. })))
        .count();
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    println!(
        "Merged {merged} of {} dialogues ({failed} failed, {} skipped) -> {}",
        reports.len(),
        reports.len() - merged - failed,
        args.out_dir.display()
    );
    Ok(())
}
