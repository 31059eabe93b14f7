//! Completion service adapter.
//!
//! [`OpenAiCompatClient`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint. [`FallbackCompletion`] wraps a service with exactly one retry on
//! a fallback model. Neither loops: retry policy belongs to the agents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::dialogue::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EndpointConfig, SamplingParams};
use crate::errors::SimError;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Model to ask. `None` lets the service pick its primary model.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, params: SamplingParams) -> Self {
        Self {
            messages,
            model: None,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Anything that turns a message sequence into text.
///
/// Implementations are stateless and shared across concurrent dialogues.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SimError>;
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SimError> {
        (**self).complete(request).await
    }
}

/// Substrings that mark a reply as an echoed upstream failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentinelPolicy {
    markers: Vec<String>,
}

impl SentinelPolicy {
    pub fn new(markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    /// First marker found in `text`, if any.
    pub fn find<'a>(&'a self, text: &str) -> Option<&'a str> {
        self.markers
            .iter()
            .map(String::as_str)
            .find(|m| text.contains(m))
    }

    /// `Ok(text)` when clean, `Err(Sentinel)` otherwise.
    pub fn check(&self, text: String) -> Result<String, SimError> {
        match self.find(&text) {
            Some(marker) => Err(SimError::Sentinel {
                marker: marker.to_string(),
            }),
            None => Ok(text),
        }
    }
}

// ── OpenAI-compatible HTTP client ──────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// `reqwest` client for `{base_url}/chat/completions`.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, SimError> {
        let http = reqwest::Client::builder()
            .timeout(endpoint.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SimError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/')),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SimError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.http.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SimError::from_http(model, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SimError::completion(model, format!("HTTP {status}: {body}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| SimError::completion(model, format!("malformed response: {e}")))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SimError::completion(model, "response carried no content"))?;

        debug!(model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

// ── Fallback wrapper ───────────────────────────────────────────────

/// Primary attempt, then one attempt on the fallback model.
///
/// Sentinel replies count as failures on both paths.
pub struct FallbackCompletion<S> {
    inner: S,
    fallback_model: Option<String>,
    sentinels: SentinelPolicy,
}

impl<S: CompletionService> FallbackCompletion<S> {
    pub fn new(inner: S, fallback_model: Option<String>, sentinels: SentinelPolicy) -> Self {
        Self {
            inner,
            fallback_model,
            sentinels,
        }
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<String, SimError> {
        let text = self.inner.complete(request).await?;
        self.sentinels.check(text)
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for FallbackCompletion<S> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SimError> {
        let primary = match self.attempt(request).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        let Some(fallback_model) = self.fallback_model.as_deref() else {
            return Err(primary);
        };

        warn!(
            error = %primary,
            fallback = fallback_model,
            "Primary model failed, trying fallback"
        );
        let retry = request.clone().with_model(fallback_model);
        self.attempt(&retry)
            .await
            .map_err(|fallback| SimError::FallbackExhausted {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            })
    }
}
