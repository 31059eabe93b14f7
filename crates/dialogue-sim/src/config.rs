//! Simulator configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by the binary after loading)
//! 2. Values in the TOML file passed with `--config`
//! 3. Environment variables (`DIALOGUE_SIM_*`), read by the `Default` impls
//! 4. Built-in defaults
//!
//! The resulting [`SimConfig`] is passed explicitly to the batch driver and
//! from there into every agent constructor. Nothing is stored globally.
//!
//! ## Sampling defaults
//!
//! | Turn kind   | Temperature | Max tokens |
//! |-------------|-------------|------------|
//! | initiator   | 0.8         | 500        |
//! | responder   | 0.7         | 300        |
//! | adjudicator | 0.3         | 500        |
//! | closing     | 0.7         | 200        |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::batch::DialogueLabel;
use coordination::dialogue::{DecisionParser, KeywordHeuristics};
use coordination::resilience::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_FALLBACK_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_SPEECH_URL: &str = "http://localhost:8004";

const ENV_BASE_URL: &str = "DIALOGUE_SIM_BASE_URL";
const ENV_API_KEY: &str = "DIALOGUE_SIM_API_KEY";
const ENV_MODEL: &str = "DIALOGUE_SIM_MODEL";
const ENV_FALLBACK_MODEL: &str = "DIALOGUE_SIM_FALLBACK_MODEL";
const ENV_SPEECH_URL: &str = "DIALOGUE_SIM_SPEECH_URL";

/// Completion endpoint and model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// OpenAI-compatible base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Tried once when the primary model fails. `None` disables fallback.
    pub fallback_model: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: env::var(ENV_API_KEY).unwrap_or_default(),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            fallback_model: Some(
                env::var(ENV_FALLBACK_MODEL)
                    .unwrap_or_else(|_| DEFAULT_FALLBACK_MODEL.to_string()),
            ),
            request_timeout_secs: 120,
        }
    }
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Temperature and output budget for one kind of turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub initiator: SamplingParams,
    pub responder: SamplingParams,
    pub adjudicator: SamplingParams,
    /// Closing turns of the termination exchange: shorter and steadier.
    pub closing: SamplingParams,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            initiator: SamplingParams::new(0.8, 500),
            responder: SamplingParams::new(0.7, 300),
            adjudicator: SamplingParams::new(0.3, 500),
            closing: SamplingParams::new(0.7, 200),
        }
    }
}

/// How readily the adjudicator ends calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Strictness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Responder/initiator exchange pairs before the call is cut off.
    pub max_turns: u32,
    pub strictness: Strictness,
    pub label: DialogueLabel,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_turns: 15,
            strictness: Strictness::Medium,
            label: DialogueLabel::Fraud,
        }
    }
}

/// Agent retry loop settings. The default never gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed { delay_ms: 5_000 },
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub count: usize,
    /// Dialogues generated concurrently.
    pub workers: usize,
    /// Summary JSONL, one record per successful dialogue. Named after the
    /// dialogue label when unset, e.g. `normal_dialogues.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Directory receiving one full transcript JSON per dialogue.
    pub full_output_dir: PathBuf,
    /// Seed for persona planning. Random when unset.
    pub seed: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            count: 20,
            workers: 10,
            output: None,
            full_output_dir: PathBuf::from("full_dialogues"),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Render service root; `/generate_voice` and `/status` hang off it.
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub initial_wait_secs: u64,
    pub max_wait_secs: u64,
    /// Dialogues rendered concurrently.
    pub concurrent_limit: usize,
    /// Insert a space between characters before rendering (CJK text).
    pub space_characters: bool,
    /// Existing clips at least this large are kept on resume.
    pub min_existing_bytes: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_SPEECH_URL).unwrap_or_else(|_| DEFAULT_SPEECH_URL.to_string()),
            request_timeout_secs: 300,
            initial_wait_secs: 5,
            max_wait_secs: 60,
            concurrent_limit: 5,
            space_characters: false,
            min_existing_bytes: 1024,
        }
    }
}

impl SpeechConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded_exponential(
            Duration::from_secs(self.initial_wait_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub endpoint: EndpointConfig,
    pub dialogue: DialogueConfig,
    pub sampling: SamplingConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub speech: SpeechConfig,
    /// Reply substrings that mark an upstream failure echoed as content.
    pub sentinels: Vec<String>,
    pub heuristics: KeywordHeuristics,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            dialogue: DialogueConfig::default(),
            sampling: SamplingConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            speech: SpeechConfig::default(),
            sentinels: vec!["API call failed".to_string(), "API调用失败".to_string()],
            heuristics: KeywordHeuristics::default(),
        }
    }
}

impl SimConfig {
    /// Defaults and environment, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Summary JSONL path: the configured output, else `<label>_dialogues.jsonl`.
    pub fn summary_path(&self) -> PathBuf {
        match &self.batch.output {
            Some(path) => path.clone(),
            None => PathBuf::from(format!("{}_dialogues.jsonl", self.dialogue.label.as_str())),
        }
    }

    /// Append-only run log written next to the summary file.
    pub fn telemetry_path(&self) -> PathBuf {
        self.summary_path()
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(".dialogue-sim-telemetry.jsonl")
    }

    /// Validate all sections; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err("endpoint.base_url must not be empty".to_string());
        }
        if self.endpoint.model.trim().is_empty() {
            return Err("endpoint.model must not be empty".to_string());
        }
        if self.dialogue.max_turns == 0 {
            return Err("dialogue.max_turns must be > 0".to_string());
        }
        if self.batch.workers == 0 {
            return Err("batch.workers must be > 0".to_string());
        }
        if self.speech.concurrent_limit == 0 {
            return Err("speech.concurrent_limit must be > 0".to_string());
        }
        if self.retry.max_attempts == Some(0) {
            return Err("retry.max_attempts must be > 0 when set".to_string());
        }
        for (name, params) in [
            ("initiator", self.sampling.initiator),
            ("responder", self.sampling.responder),
            ("adjudicator", self.sampling.adjudicator),
            ("closing", self.sampling.closing),
        ] {
            if !(0.0..=2.0).contains(&params.temperature) {
                return Err(format!(
                    "sampling.{name}.temperature must be in [0, 2], got {}",
                    params.temperature
                ));
            }
            if params.max_tokens == 0 {
                return Err(format!("sampling.{name}.max_tokens must be > 0"));
            }
        }
        self.decision_parser()
            .map_err(|e| format!("heuristics keyword set does not compile: {e}"))?;
        Ok(())
    }

    pub fn decision_parser(&self) -> Result<DecisionParser, regex::Error> {
        DecisionParser::new(&self.heuristics)
    }
}

/// Check whether an OpenAI-compatible endpoint answers `GET {url}/models`.
pub async fn check_endpoint(url: &str, api_key: Option<&str>) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    let mut request = reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        request = request.bearer_auth(key);
    }
    match request.send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
