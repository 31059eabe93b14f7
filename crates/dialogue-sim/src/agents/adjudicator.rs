//! Adjudicator: watches the call and decides when it ends.
//!
//! Replies are parsed with the JSON-extraction → whole-reply → keyword
//! chain in [`DecisionParser`]; parsing never fails, only the completion
//! call can.

use async_trait::async_trait;
use coordination::batch::DialogueLabel;
use coordination::dialogue::{
    parse_end_call_reason, ChatMessage, DecisionParser, Speaker, Transcript,
};

use super::{unsupported_input, AgentInput, AgentOutput, AgentRole, AgentRuntime, DialogueAgent};
use crate::config::{SamplingParams, Strictness};
use crate::errors::SimError;
use crate::prompts::{
    render_adjudicator_preamble, render_evaluate_request, render_explain_request, CALLEE_LABEL,
    CALLER_LABEL,
};

pub struct Adjudicator {
    label: DialogueLabel,
    strictness: Strictness,
    parser: DecisionParser,
    params: SamplingParams,
    runtime: AgentRuntime,
}

impl Adjudicator {
    pub fn new(
        label: DialogueLabel,
        strictness: Strictness,
        parser: DecisionParser,
        params: SamplingParams,
        runtime: AgentRuntime,
    ) -> Self {
        Self {
            label,
            strictness,
            parser,
            params,
            runtime,
        }
    }

    fn labeled(transcript: &Transcript) -> String {
        transcript.render_labeled(CALLER_LABEL, CALLEE_LABEL)
    }

    async fn ask(&self, request: String) -> Result<String, SimError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(request),
        ];
        self.runtime
            .complete(AgentRole::Adjudicator, messages, self.params)
            .await
    }
}

fn party_label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::Initiator => CALLER_LABEL,
        Speaker::Responder => CALLEE_LABEL,
    }
}

#[async_trait]
impl DialogueAgent for Adjudicator {
    fn role(&self) -> AgentRole {
        AgentRole::Adjudicator
    }

    fn system_prompt(&self) -> String {
        render_adjudicator_preamble(self.label, self.strictness)
    }

    async fn respond(&self, input: AgentInput<'_>) -> Result<AgentOutput, SimError> {
        match input {
            AgentInput::Evaluate { transcript } => {
                let reply = self
                    .ask(render_evaluate_request(&Self::labeled(transcript)))
                    .await?;
                let decision = self.parser.parse(&reply);
                tracing::debug!(
                    should_terminate = decision.should_terminate,
                    terminator = %decision.terminator,
                    fallback = decision.fallback_used,
                    "Adjudicator verdict"
                );
                Ok(AgentOutput::Decision(decision))
            }
            AgentInput::ExplainEndCall {
                transcript,
                terminator,
            } => {
                let who = party_label(terminator);
                let reply = self
                    .ask(render_explain_request(
                        &who.to_lowercase(),
                        &Self::labeled(transcript),
                    ))
                    .await?;
                Ok(AgentOutput::Explanation(parse_end_call_reason(&reply, who)))
            }
            other => Err(unsupported_input(AgentRole::Adjudicator, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coordination::dialogue::{KeywordHeuristics, Terminator};

    use super::*;
    use crate::agents::testing::{runtime, ScriptedCompletion};
    use crate::config::SamplingConfig;

    fn adjudicator(service: Arc<ScriptedCompletion>) -> Adjudicator {
        Adjudicator::new(
            DialogueLabel::Fraud,
            Strictness::Medium,
            DecisionParser::new(&KeywordHeuristics::default()).unwrap(),
            SamplingConfig::default().adjudicator,
            runtime(service),
        )
    }

    fn transcript() -> Transcript {
        let mut t = Transcript::new();
        t.push(Speaker::Initiator, "Send the code we just texted you.");
        t.push(Speaker::Responder, "No, I'm reporting this number.");
        t
    }

    #[tokio::test]
    async fn evaluate_parses_embedded_json() {
        let service = Arc::new(ScriptedCompletion::new([Ok(
            "Assessment:\n{\"should_terminate\": true, \"terminator\": \"right\", \"reason\": \"Callee refused.\"}"
                .into(),
        )]));
        let agent = adjudicator(service.clone());

        let decision = agent
            .respond(AgentInput::Evaluate {
                transcript: &transcript(),
            })
            .await
            .unwrap()
            .into_decision()
            .unwrap();
        assert!(decision.should_terminate);
        assert_eq!(decision.terminator, Terminator::Responder);
        assert!(!decision.fallback_used);

        let requests = service.requests.lock().unwrap();
        let user = &requests[0].messages[1].content;
        assert!(user.contains("Caller: Send the code we just texted you."));
        assert!(user.contains("Callee: No, I'm reporting this number."));
        assert_eq!(requests[0].temperature, 0.3);
    }

    #[tokio::test]
    async fn prose_reply_falls_back_without_error() {
        let prose = "The participants are still exchanging pleasantries about the weather.";
        let service = Arc::new(ScriptedCompletion::new([Ok(prose.into())]));
        let decision = adjudicator(service)
            .respond(AgentInput::Evaluate {
                transcript: &transcript(),
            })
            .await
            .unwrap()
            .into_decision()
            .unwrap();

        assert!(!decision.should_terminate);
        assert_eq!(decision.terminator, Terminator::Natural);
        assert_eq!(decision.reason, prose);
        assert!(decision.fallback_used);
    }

    #[tokio::test]
    async fn explain_end_call_uses_reason_field() {
        let service = Arc::new(ScriptedCompletion::new([
            Ok("{\"reason\": \"The callee recognised the scam.\"}".into()),
            Ok("{\"verdict\": 1}".into()),
            Ok("They were scared.".into()),
        ]));
        let agent = adjudicator(service.clone());
        let t = transcript();

        let expected = [
            "The callee recognised the scam.",
            "Callee actively hung up, reason unclear.",
            "Callee actively hung up. They were scared.",
        ];
        for want in expected {
            let got = agent
                .respond(AgentInput::ExplainEndCall {
                    transcript: &t,
                    terminator: Speaker::Responder,
                })
                .await
                .unwrap()
                .into_explanation()
                .unwrap();
            assert_eq!(got, want);
        }

        let requests = service.requests.lock().unwrap();
        assert!(requests[0].messages[1].content.starts_with("The callee hung up."));
    }
}
