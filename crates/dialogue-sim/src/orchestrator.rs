//! Dialogue orchestrator: the turn loop and its termination protocol.
//!
//! ```text
//! opening (initiator)
//! while turns remain:
//!   responder turn   ── marker ──▶ EndCallDetected (explain, no closing)
//!   adjudicate       ── stop   ──▶ ManagerTerminated (closing exchange)
//!   initiator turn   ── marker ──▶ EndCallDetected (explain, no closing)
//!   exchange += 1
//! budget spent ──▶ MaxTurnsReached
//! strip markers, freeze result
//! ```
//!
//! Agent errors propagate unchanged; the batch driver decides what a failed
//! run means.

use chrono::Utc;
use coordination::batch::DialogueTask;
use coordination::dialogue::{
    strip_end_call_marker, DialoguePhase, DialogueResult, DialogueSession, IllegalTransition,
    Speaker, Terminator, Transcript, Utterance, MAX_TURNS_REASON,
};
use tracing::{debug, info, Instrument};

use crate::agents::{
    Adjudicator, AgentInput, AgentRuntime, DialogueAgent, Initiator, InitiatorPersona, Responder,
    ResponderPersona,
};
use crate::config::SimConfig;
use crate::errors::SimError;

/// Runs one call between an initiator and a responder under an adjudicator.
pub struct DialogueOrchestrator {
    initiator: Box<dyn DialogueAgent>,
    responder: Box<dyn DialogueAgent>,
    adjudicator: Box<dyn DialogueAgent>,
    max_turns: u32,
    opening_line: Option<String>,
}

/// Mutable state of a run in progress.
struct RunState {
    session: DialogueSession,
    transcript: Transcript,
    conclusion: Vec<Utterance>,
    terminator: Terminator,
    reason: String,
    fallback_decisions: u32,
}

impl RunState {
    fn transition(&mut self, to: DialoguePhase, reason: &str) -> Result<(), SimError> {
        self.session.transition(to, reason).map_err(illegal)
    }
}

fn illegal(err: IllegalTransition) -> SimError {
    SimError::Internal(err.into())
}

impl DialogueOrchestrator {
    pub fn new(
        initiator: Box<dyn DialogueAgent>,
        responder: Box<dyn DialogueAgent>,
        adjudicator: Box<dyn DialogueAgent>,
        max_turns: u32,
    ) -> Self {
        Self {
            initiator,
            responder,
            adjudicator,
            max_turns,
            opening_line: None,
        }
    }

    /// Build the three agents for a planned task.
    pub fn for_task(
        task: &DialogueTask,
        config: &SimConfig,
        runtime: AgentRuntime,
    ) -> Result<Self, SimError> {
        let parser = config
            .decision_parser()
            .map_err(|e| SimError::Configuration(format!("heuristic keywords: {e}")))?;
        let initiator = Initiator::new(
            InitiatorPersona {
                label: task.label,
                category: task.category.clone(),
            },
            &config.sampling,
            runtime.clone(),
        );
        let responder = Responder::new(
            ResponderPersona {
                age: task.user_age,
                awareness: task.awareness,
                occupation: task.occupation.clone(),
            },
            &config.sampling,
            runtime.clone(),
        );
        let adjudicator = Adjudicator::new(
            task.label,
            config.dialogue.strictness,
            parser,
            config.sampling.adjudicator,
            runtime,
        );
        Ok(Self::new(
            Box::new(initiator),
            Box::new(responder),
            Box::new(adjudicator),
            config.dialogue.max_turns,
        ))
    }

    /// Use `line` as the initiator's opening instead of generating one.
    pub fn with_opening_line(mut self, line: impl Into<String>) -> Self {
        self.opening_line = Some(line.into());
        self
    }

    /// Run the call to completion.
    pub async fn run(&self, id: &str) -> Result<DialogueResult, SimError> {
        let span = tracing::info_span!("dialogue", id = %id);
        self.run_inner(id).instrument(span).await
    }

    async fn run_inner(&self, id: &str) -> Result<DialogueResult, SimError> {
        let started_at = Utc::now();
        let mut state = RunState {
            session: DialogueSession::new(id, self.max_turns),
            transcript: Transcript::new(),
            conclusion: Vec::new(),
            terminator: Terminator::None,
            reason: String::new(),
            fallback_decisions: 0,
        };

        let opening = match &self.opening_line {
            Some(line) => line.clone(),
            None => self.speak(Speaker::Initiator, &state.transcript).await?,
        };
        if state
            .transcript
            .push(Speaker::Initiator, opening)
            .contains_end_call()
        {
            self.handle_end_call(&mut state, Speaker::Initiator).await?;
        }

        while state.session.has_turns_remaining() {
            let reply = self.speak(Speaker::Responder, &state.transcript).await?;
            if state.transcript.push(Speaker::Responder, reply).contains_end_call() {
                self.handle_end_call(&mut state, Speaker::Responder).await?;
                break;
            }

            let decision = self
                .adjudicator
                .respond(AgentInput::Evaluate {
                    transcript: &state.transcript,
                })
                .await?
                .into_decision()?;
            if decision.fallback_used {
                state.fallback_decisions += 1;
            }
            if decision.should_terminate {
                let terminator = match decision.terminator {
                    Terminator::None => Terminator::Natural,
                    t => t,
                };
                state.transition(DialoguePhase::ManagerTerminated, &decision.reason)?;
                state.terminator = terminator;
                state.reason = decision.reason;
                self.closing_exchange(&mut state).await?;
                break;
            }

            let line = self.speak(Speaker::Initiator, &state.transcript).await?;
            if state.transcript.push(Speaker::Initiator, line).contains_end_call() {
                self.handle_end_call(&mut state, Speaker::Initiator).await?;
                break;
            }

            state.session.complete_exchange();
            debug!(turn = state.session.turn_count, "Exchange complete");
        }

        let reached_max_turns = state.session.phase == DialoguePhase::Running;
        if reached_max_turns {
            state.transition(DialoguePhase::MaxTurnsReached, MAX_TURNS_REASON)?;
            state.reason = MAX_TURNS_REASON.to_string();
        }
        let exit = state.session.phase;
        state.session.finish().map_err(illegal)?;
        debug!(status = %state.session.status_line(), "Session frozen");

        let stripped = state.transcript.strip_end_call_markers();
        for utterance in &mut state.conclusion {
            utterance.content = strip_end_call_marker(&utterance.content);
        }

        let result = DialogueResult {
            id: id.to_string(),
            history: state.transcript,
            turn_count: state.session.turn_count,
            terminated_by_manager: exit == DialoguePhase::ManagerTerminated,
            end_call_signal_detected: exit == DialoguePhase::EndCallDetected,
            termination_reason: state.reason,
            terminator: state.terminator,
            conclusion_messages: state.conclusion,
            reached_max_turns,
            fallback_decisions: state.fallback_decisions,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            exit = %exit,
            turns = result.turn_count,
            lines = result.history.len(),
            terminator = result.terminator.as_str(),
            markers_stripped = stripped,
            "Dialogue finished"
        );
        Ok(result)
    }

    fn agent(&self, speaker: Speaker) -> &dyn DialogueAgent {
        match speaker {
            Speaker::Initiator => self.initiator.as_ref(),
            Speaker::Responder => self.responder.as_ref(),
        }
    }

    async fn speak(&self, speaker: Speaker, transcript: &Transcript) -> Result<String, SimError> {
        self.agent(speaker)
            .respond(AgentInput::Turn { transcript })
            .await?
            .into_utterance()
    }

    /// A party hung up: ask for a post-hoc reason, no closing exchange.
    async fn handle_end_call(&self, state: &mut RunState, who: Speaker) -> Result<(), SimError> {
        state.transition(DialoguePhase::EndCallDetected, &format!("{who} hung up"))?;
        state.terminator = match who {
            Speaker::Initiator => Terminator::Initiator,
            Speaker::Responder => Terminator::Responder,
        };
        state.reason = self
            .adjudicator
            .respond(AgentInput::ExplainEndCall {
                transcript: &state.transcript,
                terminator: who,
            })
            .await?
            .into_explanation()?;
        Ok(())
    }

    /// Closing exchange after an adjudicated stop.
    ///
    /// When one party is designated it closes under the wrap-up instruction
    /// and the other gives a plain final reply. Natural and hang-up verdicts
    /// let the initiator close first and put both parties under the
    /// instruction.
    async fn closing_exchange(&self, state: &mut RunState) -> Result<(), SimError> {
        let (first, answer_plainly) = match state.terminator {
            Terminator::Initiator => (Speaker::Initiator, true),
            Terminator::Responder => (Speaker::Responder, true),
            _ => (Speaker::Initiator, false),
        };
        for speaker in [first, first.other()] {
            let transcript = &state.transcript;
            let input = if speaker != first && answer_plainly {
                AgentInput::FinalReply { transcript }
            } else {
                AgentInput::Closing { transcript }
            };
            let line = self.agent(speaker).respond(input).await?.into_utterance()?;
            let utterance = state.transcript.push(speaker, line).clone();
            debug!(speaker = %speaker, "Closing line recorded");
            state.conclusion.push(utterance);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coordination::batch::{AgeBracket, Awareness, DialogueLabel};
    use coordination::dialogue::END_CALL_MARKER;

    use super::*;
    use crate::agents::testing::{runtime, ScriptedCompletion};

    fn task() -> DialogueTask {
        DialogueTask {
            id: "tts_fraud_00001".into(),
            label: DialogueLabel::Fraud,
            age_bracket: AgeBracket::new(56, 70),
            user_age: 63,
            awareness: Awareness::Low,
            category: "lottery prize".into(),
            occupation: "retiree".into(),
        }
    }

    fn orchestrator(service: Arc<ScriptedCompletion>, max_turns: u32) -> DialogueOrchestrator {
        let mut config = SimConfig::default();
        config.dialogue.max_turns = max_turns;
        DialogueOrchestrator::for_task(&task(), &config, runtime(service)).unwrap()
    }

    fn keep_going() -> Result<String, SimError> {
        Ok(r#"{"should_terminate": false, "terminator": "natural", "reason": "ongoing"}"#.into())
    }

    #[tokio::test]
    async fn responder_hangup_via_completion_service() {
        // Call order: opening, responder, adjudicator, initiator, responder, explain.
        let service = Arc::new(ScriptedCompletion::new([
            Ok("Congratulations, you won a car!".into()),
            Ok("Really? What do I do?".into()),
            keep_going(),
            Ok("Just pay the transfer fee.".into()),
            Ok(format!("That's a scam. {END_CALL_MARKER}")),
            Ok(r#"{"reason": "Fee request exposed the scam."}"#.into()),
        ]));
        let result = orchestrator(service.clone(), 5).run("tts_fraud_00001").await.unwrap();

        assert!(result.end_call_signal_detected);
        assert!(!result.terminated_by_manager);
        assert_eq!(result.terminator, Terminator::Responder);
        assert_eq!(result.turn_count, 1);
        assert_eq!(result.termination_reason, "Fee request exposed the scam.");
        assert!(result.conclusion_messages.is_empty());
        assert!(!result.history.contains_text(END_CALL_MARKER));
        assert_eq!(service.requests.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn designated_closer_gets_instruction_and_other_party_answers_plainly() {
        // Call order: opening, responder, adjudicator, responder closing, initiator reply.
        let service = Arc::new(ScriptedCompletion::new([
            Ok("Congratulations, you won a car!".into()),
            Ok("I never entered any draw.".into()),
            Ok(r#"{"should_terminate": true, "terminator": "right", "reason": "Callee refuses."}"#
                .into()),
            Ok("I'm hanging up and calling my bank.".into()),
            Ok("Your loss, sir.".into()),
        ]));
        let result = orchestrator(service.clone(), 5).run("tts_fraud_00001").await.unwrap();

        assert_eq!(result.terminator, Terminator::Responder);
        assert_eq!(result.conclusion_messages.len(), 2);
        assert_eq!(result.conclusion_messages[1].content, "Your loss, sir.");

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 5);
        let closing = &requests[3];
        let reply = &requests[4];
        assert!(closing
            .messages
            .last()
            .unwrap()
            .content
            .contains("System notice"));
        assert!(reply
            .messages
            .iter()
            .all(|m| !m.content.contains("System notice")));
        assert!(reply
            .messages
            .last()
            .unwrap()
            .content
            .ends_with("I'm hanging up and calling my bank."));
        assert_eq!(closing.max_tokens, 200);
        assert_eq!(reply.max_tokens, 200);
    }
}
