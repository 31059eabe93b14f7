//! Initiator: the party that places the call and drives it.

use async_trait::async_trait;
use coordination::batch::DialogueLabel;
use coordination::dialogue::Speaker;

use super::{AgentInput, AgentOutput, AgentRole, AgentRuntime, DialogueAgent, Voice};
use crate::config::SamplingConfig;
use crate::errors::SimError;
use crate::prompts::{render_initiator_preamble, render_wrap_up, INITIATOR_WRAP_UP};

/// Scenario the initiator plays out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorPersona {
    pub label: DialogueLabel,
    /// Fraud type, or conversation type for ordinary calls.
    pub category: String,
}

pub struct Initiator {
    voice: Voice,
}

impl Initiator {
    pub fn new(persona: InitiatorPersona, sampling: &SamplingConfig, runtime: AgentRuntime) -> Self {
        let voice = Voice {
            speaker: Speaker::Initiator,
            system_prompt: render_initiator_preamble(persona.label, &persona.category),
            wrap_up: render_wrap_up(INITIATOR_WRAP_UP),
            turn: sampling.initiator,
            closing: sampling.closing,
            runtime,
        };
        Self { voice }
    }
}

#[async_trait]
impl DialogueAgent for Initiator {
    fn role(&self) -> AgentRole {
        AgentRole::Initiator
    }

    fn system_prompt(&self) -> String {
        self.voice.system_prompt.clone()
    }

    async fn respond(&self, input: AgentInput<'_>) -> Result<AgentOutput, SimError> {
        self.voice.speak(input).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coordination::dialogue::{ChatRole, Transcript};

    use super::*;
    use crate::agents::testing::{runtime, ScriptedCompletion};

    fn initiator(service: Arc<ScriptedCompletion>) -> Initiator {
        Initiator::new(
            InitiatorPersona {
                label: DialogueLabel::Fraud,
                category: "bank impersonation".into(),
            },
            &SamplingConfig::default(),
            runtime(service),
        )
    }

    #[tokio::test]
    async fn opening_turn_sends_only_the_system_prompt() {
        let service = Arc::new(ScriptedCompletion::new([Ok("Hello, bank security here.".into())]));
        let agent = initiator(service.clone());

        let out = agent
            .respond(AgentInput::Turn {
                transcript: &Transcript::new(),
            })
            .await
            .unwrap();
        assert_eq!(out, AgentOutput::Utterance("Hello, bank security here.".into()));

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].messages[0].content.contains("bank impersonation"));
        assert_eq!(requests[0].temperature, 0.8);
        assert_eq!(requests[0].max_tokens, 500);
    }

    #[tokio::test]
    async fn closing_turn_uses_wrap_up_and_closing_params() {
        let service = Arc::new(ScriptedCompletion::new([Ok("I'll call back later.".into())]));
        let agent = initiator(service.clone());

        let mut transcript = Transcript::new();
        transcript.push(Speaker::Initiator, "Your account is frozen.");
        transcript.push(Speaker::Responder, "I don't believe you.");
        agent
            .respond(AgentInput::Closing {
                transcript: &transcript,
            })
            .await
            .unwrap();

        let requests = service.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages[1].role, ChatRole::Assistant);
        let last = messages.last().unwrap();
        assert_eq!(last.role, ChatRole::User);
        assert!(last.content.starts_with("I don't believe you."));
        assert!(last.content.contains("System notice"));
        assert_eq!(requests[0].max_tokens, 200);
        // The instruction never enters the transcript.
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn final_reply_answers_without_wrap_up() {
        let service = Arc::new(ScriptedCompletion::new([Ok("Fine, goodbye.".into())]));
        let agent = initiator(service.clone());

        let mut transcript = Transcript::new();
        transcript.push(Speaker::Initiator, "Your account is frozen.");
        transcript.push(Speaker::Responder, "I'm reporting this number.");
        let text = agent
            .respond(AgentInput::FinalReply {
                transcript: &transcript,
            })
            .await
            .unwrap()
            .into_utterance()
            .unwrap();
        assert_eq!(text, "Fine, goodbye.");

        let requests = service.requests.lock().unwrap();
        let last = requests[0].messages.last().unwrap();
        assert_eq!(last.role, ChatRole::User);
        assert_eq!(last.content, "I'm reporting this number.");
        assert_eq!(requests[0].max_tokens, 200);
        assert_eq!(requests[0].temperature, 0.7);
    }

    #[tokio::test]
    async fn rejects_evaluate_requests() {
        let agent = initiator(Arc::new(ScriptedCompletion::default()));
        let err = agent
            .respond(AgentInput::Evaluate {
                transcript: &Transcript::new(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("initiator cannot handle evaluate"));
    }
}
