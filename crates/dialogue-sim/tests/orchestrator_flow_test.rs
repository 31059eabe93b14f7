//! Orchestrator exit paths driven by scripted agents.
//!
//! Each agent replays a fixed list of outputs and logs which kind of input it
//! was handed, so the tests can check both the frozen result and the order of
//! agent calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::dialogue::{
    Speaker, TerminationDecision, Terminator, END_CALL_MARKER, MAX_TURNS_REASON,
};
use dialogue_sim::agents::{AgentInput, AgentOutput, AgentRole, DialogueAgent};
use dialogue_sim::errors::SimError;
use dialogue_sim::orchestrator::DialogueOrchestrator;

type CallLog = Arc<Mutex<Vec<String>>>;

struct ScriptedAgent {
    role: AgentRole,
    replies: Mutex<VecDeque<AgentOutput>>,
    log: CallLog,
}

impl ScriptedAgent {
    fn boxed(role: AgentRole, replies: Vec<AgentOutput>, log: &CallLog) -> Box<dyn DialogueAgent> {
        Box::new(Self {
            role,
            replies: Mutex::new(replies.into()),
            log: log.clone(),
        })
    }
}

#[async_trait]
impl DialogueAgent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    fn system_prompt(&self) -> String {
        format!("{} prompt", self.role)
    }

    async fn respond(&self, input: AgentInput<'_>) -> Result<AgentOutput, SimError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.role, input.kind()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SimError::Configuration(format!("{} script exhausted", self.role)))
    }
}

fn say(text: &str) -> AgentOutput {
    AgentOutput::Utterance(text.to_string())
}

fn carry_on() -> AgentOutput {
    AgentOutput::Decision(TerminationDecision::continue_call("still talking"))
}

fn stop(terminator: Terminator, reason: &str) -> AgentOutput {
    AgentOutput::Decision(TerminationDecision {
        should_terminate: true,
        terminator,
        reason: reason.to_string(),
        fallback_used: false,
    })
}

fn orchestrator(
    initiator: Vec<AgentOutput>,
    responder: Vec<AgentOutput>,
    adjudicator: Vec<AgentOutput>,
    max_turns: u32,
) -> (DialogueOrchestrator, CallLog) {
    let log = CallLog::default();
    let orchestrator = DialogueOrchestrator::new(
        ScriptedAgent::boxed(AgentRole::Initiator, initiator, &log),
        ScriptedAgent::boxed(AgentRole::Responder, responder, &log),
        ScriptedAgent::boxed(AgentRole::Adjudicator, adjudicator, &log),
        max_turns,
    );
    (orchestrator, log)
}

fn roles(result: &coordination::dialogue::DialogueResult) -> Vec<Speaker> {
    result.history.utterances().iter().map(|u| u.role).collect()
}

#[tokio::test]
async fn turn_budget_exhaustion() {
    let (orch, log) = orchestrator(
        vec![say("Hello"), say("One"), say("Two"), say("Three")],
        vec![say("Hi"), say("Uh huh"), say("Sure")],
        vec![carry_on(), carry_on(), carry_on()],
        3,
    );
    let result = orch.run("tts_fraud_00001").await.unwrap();

    assert!(result.reached_max_turns);
    assert!(!result.terminated_by_manager);
    assert!(!result.end_call_signal_detected);
    assert_eq!(result.turn_count, 3);
    assert_eq!(result.terminator, Terminator::None);
    assert_eq!(result.terminator.as_str(), "");
    assert_eq!(result.termination_reason, MAX_TURNS_REASON);
    assert_eq!(result.history.len(), 7);
    assert!(result.conclusion_messages.is_empty());
    assert_eq!(log.lock().unwrap().len(), 10);
}

#[tokio::test]
async fn responder_hangup_skips_closing_exchange() {
    let (orch, log) = orchestrator(
        vec![say("Your account is frozen.")],
        vec![say(&format!("I don't believe you.{END_CALL_MARKER}"))],
        vec![AgentOutput::Explanation("Callee suspected fraud.".into())],
        5,
    );
    let result = orch.run("tts_fraud_00002").await.unwrap();

    assert!(result.end_call_signal_detected);
    assert!(!result.terminated_by_manager);
    assert!(!result.reached_max_turns);
    assert_eq!(result.terminator, Terminator::Responder);
    assert_eq!(result.turn_count, 0);
    assert_eq!(result.termination_reason, "Callee suspected fraud.");
    assert!(result.conclusion_messages.is_empty());
    assert_eq!(result.history.utterances()[1].content, "I don't believe you.");

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            "initiator:turn",
            "responder:turn",
            "adjudicator:explain_end_call"
        ]
    );
}

#[tokio::test]
async fn natural_stop_closes_initiator_first() {
    let (orch, log) = orchestrator(
        vec![say("Hello, this is your bank."), say("Thanks for your time.")],
        vec![say("Hello."), say("Goodbye.")],
        vec![stop(Terminator::Natural, "Conversation reached its end.")],
        10,
    );
    let result = orch.run("tts_normal_00001").await.unwrap();

    assert!(result.terminated_by_manager);
    assert_eq!(result.terminator, Terminator::Natural);
    assert_eq!(result.turn_count, 0);
    let closers: Vec<Speaker> = result.conclusion_messages.iter().map(|u| u.role).collect();
    assert_eq!(closers, vec![Speaker::Initiator, Speaker::Responder]);
    assert_eq!(
        roles(&result),
        vec![
            Speaker::Initiator,
            Speaker::Responder,
            Speaker::Initiator,
            Speaker::Responder
        ]
    );
    assert_eq!(
        log.lock().unwrap()[3..],
        ["initiator:closing".to_string(), "responder:closing".to_string()]
    );
}

#[tokio::test]
async fn responder_designated_closes_first() {
    let (orch, log) = orchestrator(
        vec![say("Send the code."), say("Fine, bye.")],
        vec![say("What code?"), say("I'm calling the police.")],
        vec![stop(Terminator::Responder, "Callee refuses.")],
        10,
    );
    let result = orch.run("tts_fraud_00003").await.unwrap();

    assert_eq!(result.terminator, Terminator::Responder);
    let closers: Vec<Speaker> = result.conclusion_messages.iter().map(|u| u.role).collect();
    assert_eq!(closers, vec![Speaker::Responder, Speaker::Initiator]);
    assert_eq!(result.conclusion_messages[0].content, "I'm calling the police.");
    assert_eq!(
        log.lock().unwrap()[3..],
        ["responder:closing".to_string(), "initiator:final_reply".to_string()]
    );
}

#[tokio::test]
async fn initiator_designated_after_one_exchange() {
    let (orch, log) = orchestrator(
        vec![say("Hi"), say("Let me explain"), say("I'll hang up now.")],
        vec![say("Yes?"), say("Go on"), say("Okay.")],
        vec![carry_on(), stop(Terminator::Initiator, "Caller gave up.")],
        10,
    );
    let result = orch.run("tts_fraud_00004").await.unwrap();

    assert_eq!(result.turn_count, 1);
    assert_eq!(result.terminator, Terminator::Initiator);
    assert_eq!(result.conclusion_messages[0].role, Speaker::Initiator);
    assert_eq!(result.history.len(), 6);
    assert_eq!(
        log.lock().unwrap()[6..],
        ["initiator:closing".to_string(), "responder:final_reply".to_string()]
    );
}

#[tokio::test]
async fn unlabelled_stop_becomes_natural() {
    let (orch, _) = orchestrator(
        vec![say("Hello"), say("Bye")],
        vec![say("Hi"), say("Bye")],
        vec![stop(Terminator::None, "done")],
        4,
    );
    let result = orch.run("tts_normal_00002").await.unwrap();
    assert_eq!(result.terminator, Terminator::Natural);
    assert!(result.terminated_by_manager);
}

#[tokio::test]
async fn initiator_hangup_strips_marker_and_counts_fallbacks() {
    let mut heuristic = TerminationDecision::continue_call("no JSON in reply");
    heuristic.fallback_used = true;
    let (orch, _) = orchestrator(
        vec![say("Pay now."), say(&format!("Forget it.{END_CALL_MARKER}"))],
        vec![say("No.")],
        vec![
            AgentOutput::Decision(heuristic),
            AgentOutput::Explanation("Caller actively hung up, reason unclear.".into()),
        ],
        5,
    );
    let result = orch.run("tts_fraud_00005").await.unwrap();

    assert!(result.end_call_signal_detected);
    assert_eq!(result.terminator, Terminator::Initiator);
    assert_eq!(result.fallback_decisions, 1);
    assert_eq!(result.turn_count, 0);
    assert!(!result.history.contains_text(END_CALL_MARKER));
    assert_eq!(result.history.last().unwrap().content, "Forget it.");
}

#[tokio::test]
async fn agent_error_aborts_the_run() {
    let (orch, _) = orchestrator(vec![say("Hello")], vec![], vec![], 3);
    let err = orch.run("tts_fraud_00006").await.unwrap_err();
    assert!(err.to_string().contains("responder script exhausted"));
}
