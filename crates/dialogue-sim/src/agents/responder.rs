//! Responder: the person who picks up the phone.

use async_trait::async_trait;
use coordination::batch::Awareness;
use coordination::dialogue::Speaker;

use super::{AgentInput, AgentOutput, AgentRole, AgentRuntime, DialogueAgent, Voice};
use crate::config::SamplingConfig;
use crate::errors::SimError;
use crate::prompts::{render_responder_preamble, render_wrap_up, RESPONDER_WRAP_UP};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderPersona {
    pub age: u8,
    pub awareness: Awareness,
    pub occupation: String,
}

pub struct Responder {
    voice: Voice,
}

impl Responder {
    pub fn new(persona: ResponderPersona, sampling: &SamplingConfig, runtime: AgentRuntime) -> Self {
        let voice = Voice {
            speaker: Speaker::Responder,
            system_prompt: render_responder_preamble(
                persona.age,
                persona.awareness,
                &persona.occupation,
            ),
            wrap_up: render_wrap_up(RESPONDER_WRAP_UP),
            turn: sampling.responder,
            closing: sampling.closing,
            runtime,
        };
        Self { voice }
    }
}

#[async_trait]
impl DialogueAgent for Responder {
    fn role(&self) -> AgentRole {
        AgentRole::Responder
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

    #[tokio::test]
    async fn sees_initiator_lines_as_user_messages() {
        let service = Arc::new(ScriptedCompletion::new([Ok("Who is calling?".into())]));
        let agent = Responder::new(
            ResponderPersona {
                age: 34,
                awareness: Awareness::Medium,
                occupation: "teacher".into(),
            },
            &SamplingConfig::default(),
            runtime(service.clone()),
        );

        let mut transcript = Transcript::new();
        transcript.push(Speaker::Initiator, "Hello, this is customs.");
        let text = agent
            .respond(AgentInput::Turn {
                transcript: &transcript,
            })
            .await
            .unwrap()
            .into_utterance()
            .unwrap();
        assert_eq!(text, "Who is calling?");

        let requests = service.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("Occupation: teacher"));
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(requests[0].temperature, 0.7);
        assert_eq!(requests[0].max_tokens, 300);
    }
}
