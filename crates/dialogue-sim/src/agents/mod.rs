//! Dialogue agents.
//!
//! Three roles share one capability trait:
//!
//! | Role        | Answers                      | Output                     |
//! |-------------|------------------------------|----------------------------|
//! | Initiator   | `Turn`, `Closing`, `FinalReply` | `Utterance`             |
//! | Responder   | `Turn`, `Closing`, `FinalReply` | `Utterance`             |
//! | Adjudicator | `Evaluate`, `ExplainEndCall` | `Decision`, `Explanation`  |
//!
//! Agents keep no private history. Each call derives the prompt from the
//! unified [`Transcript`] it is handed, so the two speakers can never drift
//! out of sync.

pub mod adjudicator;
pub mod initiator;
pub mod responder;

use std::sync::Arc;

use async_trait::async_trait;
use coordination::dialogue::{ChatMessage, Speaker, TerminationDecision, Transcript};
use coordination::resilience::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::completion::{CompletionRequest, CompletionService, SentinelPolicy};
use crate::config::{SamplingParams, SimConfig};
use crate::errors::SimError;
use crate::retry::retry_with_policy;

pub use adjudicator::Adjudicator;
pub use initiator::{Initiator, InitiatorPersona};
pub use responder::{Responder, ResponderPersona};

/// Which seat an agent occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Initiator,
    Responder,
    Adjudicator,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
            Self::Adjudicator => write!(f, "adjudicator"),
        }
    }
}

/// What an agent is asked to do.
#[derive(Debug, Clone, Copy)]
pub enum AgentInput<'a> {
    /// Produce the next regular line.
    Turn { transcript: &'a Transcript },
    /// Produce a closing line under the wrap-up instruction.
    Closing { transcript: &'a Transcript },
    /// Answer the other party's closing line, without the instruction.
    FinalReply { transcript: &'a Transcript },
    /// Decide whether the call should end.
    Evaluate { transcript: &'a Transcript },
    /// Explain why `terminator` hung up.
    ExplainEndCall {
        transcript: &'a Transcript,
        terminator: Speaker,
    },
}

impl AgentInput<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Turn { .. } => "turn",
            Self::Closing { .. } => "closing",
            Self::FinalReply { .. } => "final_reply",
            Self::Evaluate { .. } => "evaluate",
            Self::ExplainEndCall { .. } => "explain_end_call",
        }
    }
}

/// What an agent produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Utterance(String),
    Decision(TerminationDecision),
    Explanation(String),
}

impl AgentOutput {
    fn kind(&self) -> &'static str {
        match self {
            Self::Utterance(_) => "utterance",
            Self::Decision(_) => "decision",
            Self::Explanation(_) => "explanation",
        }
    }

    pub fn into_utterance(self) -> Result<String, SimError> {
        match self {
            Self::Utterance(text) => Ok(text),
            other => Err(unexpected_output("utterance", &other)),
        }
    }

    pub fn into_decision(self) -> Result<TerminationDecision, SimError> {
        match self {
            Self::Decision(decision) => Ok(decision),
            other => Err(unexpected_output("decision", &other)),
        }
    }

    pub fn into_explanation(self) -> Result<String, SimError> {
        match self {
            Self::Explanation(text) => Ok(text),
            other => Err(unexpected_output("explanation", &other)),
        }
    }
}

fn unexpected_output(wanted: &str, got: &AgentOutput) -> SimError {
    SimError::Internal(anyhow::anyhow!(
        "expected {wanted} from agent, got {}",
        got.kind()
    ))
}

pub(crate) fn unsupported_input(role: AgentRole, input: &AgentInput<'_>) -> SimError {
    SimError::Internal(anyhow::anyhow!(
        "{role} cannot handle {} requests",
        input.kind()
    ))
}

/// One participant of a simulated call.
#[async_trait]
pub trait DialogueAgent: Send + Sync {
    fn role(&self) -> AgentRole;

    fn system_prompt(&self) -> String;

    async fn respond(&self, input: AgentInput<'_>) -> Result<AgentOutput, SimError>;
}

// ── Shared runtime ──────────────────────────────────────────────────

/// Completion access shared by all agents of a run: the service, the
/// no-giveup retry policy and the run's cancellation token.
#[derive(Clone)]
pub struct AgentRuntime {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    sentinels: SentinelPolicy,
    cancel: CancellationToken,
}

impl AgentRuntime {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        sentinels: SentinelPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            completion,
            retry,
            sentinels,
            cancel,
        }
    }

    pub fn from_config(
        completion: Arc<dyn CompletionService>,
        config: &SimConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            completion,
            config.retry.policy(),
            SentinelPolicy::new(config.sentinels.iter().cloned()),
            cancel,
        )
    }

    /// Complete `messages`, retrying transport and sentinel failures per policy.
    pub async fn complete(
        &self,
        role: AgentRole,
        messages: Vec<ChatMessage>,
        params: SamplingParams,
    ) -> Result<String, SimError> {
        let request = CompletionRequest::new(messages, params);
        let label = role.to_string();
        let reply = retry_with_policy(&self.retry, &self.cancel, &label, |attempt| {
            let request = &request;
            async move {
                debug!(role = %role, attempt, "Requesting completion");
                let text = self.completion.complete(request).await?;
                self.sentinels.check(text)
            }
        })
        .await?;
        Ok(reply.trim().to_string())
    }
}

/// Prompt-building and sampling shared by the two speaking roles.
pub(crate) struct Voice {
    pub(crate) speaker: Speaker,
    pub(crate) system_prompt: String,
    pub(crate) wrap_up: String,
    pub(crate) turn: SamplingParams,
    pub(crate) closing: SamplingParams,
    pub(crate) runtime: AgentRuntime,
}

impl Voice {
    fn role(&self) -> AgentRole {
        match self.speaker {
            Speaker::Initiator => AgentRole::Initiator,
            Speaker::Responder => AgentRole::Responder,
        }
    }

    pub(crate) async fn speak(&self, input: AgentInput<'_>) -> Result<AgentOutput, SimError> {
        let (messages, params) = match input {
            AgentInput::Turn { transcript } => (
                transcript.perspective(self.speaker, &self.system_prompt),
                self.turn,
            ),
            AgentInput::Closing { transcript } => (
                transcript.perspective_with_instruction(
                    self.speaker,
                    &self.system_prompt,
                    &self.wrap_up,
                ),
                self.closing,
            ),
            AgentInput::FinalReply { transcript } => (
                transcript.perspective(self.speaker, &self.system_prompt),
                self.closing,
            ),
            other => return Err(unsupported_input(self.role(), &other)),
        };
        let text = self.runtime.complete(self.role(), messages, params).await?;
        Ok(AgentOutput::Utterance(text))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::*;
    use super::*;

    #[test]
    fn output_accessors_reject_wrong_variant() {
        let out = AgentOutput::Utterance("hello".into());
        assert!(out.clone().into_decision().is_err());
        assert_eq!(out.into_utterance().unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_retries_sentinel_then_trims() {
        let service = Arc::new(ScriptedCompletion::new([
            Ok("API call failed: upstream 500".to_string()),
            Err(SimError::completion("m", "reset")),
            Ok("  Hello, who is this?\n".to_string()),
        ]));
        let runtime = runtime(service.clone());

        let text = runtime
            .complete(
                AgentRole::Responder,
                vec![ChatMessage::system("sys")],
                SamplingParams::new(0.7, 300),
            )
            .await
            .unwrap();

        assert_eq!(text, "Hello, who is this?");
        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.max_tokens == 300));
    }
}
