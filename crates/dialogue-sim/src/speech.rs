//! Speech render client.
//!
//! Turns summary records into per-line audio clips through a remote render
//! service:
//!
//! ```text
//! {out}/{tts_id}/voices.json
//! {out}/{tts_id}/left/{i}.wav
//! {out}/{tts_id}/right/{i}.wav
//! ```
//!
//! Every clip is retried without limit on exponential backoff. Clips that
//! already exist (above a size floor) are kept, so an interrupted run can be
//! restarted in place.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::batch::SummaryRecord;
use coordination::dialogue::Speaker;
use coordination::resilience::RetryPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::errors::SimError;
use crate::retry::retry_with_policy;

// ── Request body ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefineTextParams {
    pub prompt: String,
    #[serde(rename = "top_P")]
    pub top_p: f32,
    #[serde(rename = "top_K")]
    pub top_k: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub max_new_token: u32,
    pub min_new_token: u32,
    pub show_tqdm: bool,
    pub ensure_non_empty: bool,
    pub stream_batch: u32,
}

impl Default for RefineTextParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            top_p: 0.7,
            top_k: 20,
            temperature: 0.7,
            repetition_penalty: 1.0,
            max_new_token: 384,
            min_new_token: 0,
            show_tqdm: false,
            ensure_non_empty: true,
            stream_batch: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferCodeParams {
    pub prompt: String,
    #[serde(rename = "top_P")]
    pub top_p: f32,
    #[serde(rename = "top_K")]
    pub top_k: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub max_new_token: u32,
    pub min_new_token: u32,
    pub show_tqdm: bool,
    pub ensure_non_empty: bool,
    pub stream_batch: bool,
    pub spk_emb: Option<String>,
    /// Fixes the speaker voice.
    pub manual_seed: Option<u32>,
}

impl InferCodeParams {
    pub fn for_voice(seed: u32) -> Self {
        Self {
            prompt: "[speed_5]".to_string(),
            top_p: 0.1,
            top_k: 20,
            temperature: 0.3,
            repetition_penalty: 1.05,
            max_new_token: 2048,
            min_new_token: 0,
            show_tqdm: false,
            ensure_non_empty: true,
            stream_batch: true,
            spk_emb: None,
            manual_seed: Some(seed),
        }
    }
}

/// Body of `POST {base_url}/generate_voice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderBody {
    pub text: Vec<String>,
    pub stream: bool,
    pub lang: Option<String>,
    pub skip_refine_text: bool,
    pub refine_text_only: bool,
    pub use_decoder: bool,
    pub do_text_normalization: bool,
    pub do_homophone_replacement: bool,
    pub params_refine_text: RefineTextParams,
    pub params_infer_code: InferCodeParams,
}

impl RenderBody {
    pub fn new(text: &str, seed: u32, space_characters: bool) -> Self {
        let text = if space_characters {
            space_out(text)
        } else {
            text.to_string()
        };
        Self {
            text: vec![text],
            stream: false,
            lang: None,
            skip_refine_text: true,
            refine_text_only: false,
            use_decoder: true,
            do_text_normalization: true,
            do_homophone_replacement: false,
            params_refine_text: RefineTextParams::default(),
            params_infer_code: InferCodeParams::for_voice(seed),
        }
    }
}

/// Put a space between every character (helps CJK prosody).
pub fn space_out(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for (i, c) in text.chars().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// Audio of the first entry in a render archive.
pub fn extract_audio(archive: &[u8]) -> Result<Vec<u8>, SimError> {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive))
        .map_err(|e| SimError::Archive(e.to_string()))?;
    if zip.is_empty() {
        return Err(SimError::Archive("archive has no entries".into()));
    }
    let mut entry = zip
        .by_index(0)
        .map_err(|e| SimError::Archive(e.to_string()))?;
    let mut audio = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut audio)
        .map_err(|e| SimError::Archive(e.to_string()))?;
    Ok(audio)
}

// ── Service ─────────────────────────────────────────────────────────

#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Render one body; returns the raw archive bytes.
    async fn render(&self, body: &RenderBody) -> Result<Vec<u8>, SimError>;

    /// Whether at least one render instance is up.
    async fn is_ready(&self) -> Result<bool, SimError>;
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    instances: serde_json::Map<String, serde_json::Value>,
}

pub struct HttpSpeechService {
    http: reqwest::Client,
    generate_url: String,
    status_url: String,
}

impl HttpSpeechService {
    pub fn new(config: &SpeechConfig) -> Result<Self, SimError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SimError::Configuration(format!("HTTP client: {e}")))?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            generate_url: format!("{base}/generate_voice"),
            status_url: format!("{base}/status"),
        })
    }
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn render(&self, body: &RenderBody) -> Result<Vec<u8>, SimError> {
        let response = self
            .http
            .post(&self.generate_url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SimError::Timeout(format!("speech render: {e}"))
                } else {
                    SimError::Speech(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SimError::Speech(format!("HTTP {status}: {text}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SimError::Speech(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn is_ready(&self) -> Result<bool, SimError> {
        let response = self
            .http
            .get(&self.status_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SimError::Speech(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| SimError::Speech(e.to_string()))?;
        Ok(!status.instances.is_empty())
    }
}

// ── Renderer ────────────────────────────────────────────────────────

/// Speaker seeds of one dialogue, persisted as `voices.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAssignment {
    pub left_seed: u32,
    pub right_seed: u32,
}

impl VoiceAssignment {
    /// Two distinct random seeds.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let left_seed = rng.gen_range(0..i32::MAX as u32);
        let mut right_seed = rng.gen_range(0..i32::MAX as u32);
        while right_seed == left_seed {
            right_seed = rng.gen_range(0..i32::MAX as u32);
        }
        Self {
            left_seed,
            right_seed,
        }
    }

    pub fn seed(&self, speaker: Speaker) -> u32 {
        match speaker {
            Speaker::Initiator => self.left_seed,
            Speaker::Responder => self.right_seed,
        }
    }

    /// Load `path`, or draw and save a new assignment.
    pub fn load_or_create(path: &Path) -> Result<Self, SimError> {
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
            return Ok(serde_json::from_str(&text)?);
        }
        let voices = Self::random(&mut rand::thread_rng());
        std::fs::write(path, serde_json::to_string_pretty(&voices)?)
            .map_err(|e| SimError::io(path, e))?;
        Ok(voices)
    }
}

/// Per-dialogue render outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedDialogue {
    pub id: String,
    pub written: usize,
    pub skipped: usize,
}

pub struct SpeechRenderer {
    service: Arc<dyn SpeechService>,
    config: SpeechConfig,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SpeechRenderer {
    pub fn new(service: Arc<dyn SpeechService>, config: SpeechConfig, cancel: CancellationToken) -> Self {
        let policy = config.retry_policy();
        Self {
            service,
            config,
            policy,
            cancel,
        }
    }

    /// Replace the retry schedule (tests use short or bounded policies).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll the status endpoint until an instance reports ready.
    pub async fn wait_until_ready(&self) -> Result<(), SimError> {
        let interval = Duration::from_secs(self.config.initial_wait_secs);
        loop {
            match self.service.is_ready().await {
                Ok(true) => {
                    info!("Speech service is ready");
                    return Ok(());
                }
                Ok(false) => debug!("Speech service has no ready instance yet"),
                Err(e) => warn!(error = %e, "Speech service not reachable yet"),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SimError::Cancelled("waiting for speech service".into()));
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn is_done(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.len() > self.config.min_existing_bytes)
            .unwrap_or(false)
    }

    /// Render one clip to `path`, retrying per policy.
    pub async fn render_clip(&self, text: &str, seed: u32, path: &Path) -> Result<(), SimError> {
        let body = RenderBody::new(text, seed, self.config.space_characters);
        let label = path.display().to_string();
        let audio = retry_with_policy(&self.policy, &self.cancel, &label, |_| {
            let body = &body;
            async move {
                let archive = self.service.render(body).await?;
                extract_audio(&archive)
            }
        })
        .await?;
        tokio::fs::write(path, audio)
            .await
            .map_err(|e| SimError::io(path, e))
    }

    /// Render both sides of one summary record under `out_dir/{tts_id}`.
    pub async fn render_dialogue(
        &self,
        record: &SummaryRecord,
        out_dir: &Path,
    ) -> Result<RenderedDialogue, SimError> {
        let base = out_dir.join(&record.tts_id);
        let mut outcome = RenderedDialogue {
            id: record.tts_id.clone(),
            ..Default::default()
        };
        for side in [Speaker::Initiator, Speaker::Responder] {
            let dir = base.join(side.side());
            std::fs::create_dir_all(&dir).map_err(|e| SimError::io(&dir, e))?;
        }
        let voices = VoiceAssignment::load_or_create(&base.join("voices.json"))?;

        for (speaker, lines) in [
            (Speaker::Initiator, &record.left),
            (Speaker::Responder, &record.right),
        ] {
            for (i, text) in lines.iter().enumerate() {
                let path = clip_path(&base, speaker, i);
                if self.is_done(&path) {
                    outcome.skipped += 1;
                    continue;
                }
                self.render_clip(text, voices.seed(speaker), &path).await?;
                outcome.written += 1;
            }
        }
        info!(
            id = %outcome.id,
            written = outcome.written,
            skipped = outcome.skipped,
            "Dialogue rendered"
        );
        Ok(outcome)
    }
}

pub fn clip_path(base: &Path, speaker: Speaker, index: usize) -> PathBuf {
    base.join(speaker.side()).join(format!("{index}.wav"))
}

/// Render every record with at most `concurrent_limit` dialogues in flight.
///
/// Returns per-dialogue outcomes in record order; a failed dialogue does not
/// stop the others.
pub async fn render_all(
    renderer: Arc<SpeechRenderer>,
    records: Vec<SummaryRecord>,
    out_dir: PathBuf,
) -> Vec<Result<RenderedDialogue, SimError>> {
    let sem = Arc::new(Semaphore::new(renderer.config.concurrent_limit.max(1)));
    let out_dir = Arc::new(out_dir);
    let mut join_set = JoinSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let sem = sem.clone();
        let renderer = renderer.clone();
        let out_dir = out_dir.clone();
        join_set.spawn(async move {
            let result = match sem.acquire_owned().await {
                Ok(_permit) => renderer.render_dialogue(&record, &out_dir).await,
                Err(_) => Err(SimError::Cancelled("render pool closed".into())),
            };
            (index, result)
        });
    }

    let mut results = Vec::new();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(pair) => results.push(pair),
            Err(e) => warn!(error = %e, "render worker panicked"),
        }
    }
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, r)| r).collect()
}
