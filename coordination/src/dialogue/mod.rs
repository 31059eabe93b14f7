//! Dialogue turn-taking model: transcript, termination decisions, and the
//! phase state machine a run moves through.
//!
//! # Run flow
//!
//! ```text
//! opening (initiator)
//!   └─ loop while turns remain:
//!        responder speaks ── marker? ──► EndCallDetected (post-hoc explanation only)
//!        adjudicator     ── stop?   ──► ManagerTerminated (closing exchange)
//!        initiator speaks ── marker? ──► EndCallDetected
//!   budget exhausted ──────────────────► MaxTurnsReached
//! all exits ──► Done (markers stripped, result frozen)
//! ```

pub mod decision;
pub mod extract;
pub mod result;
pub mod state;
pub mod transcript;

pub use decision::{
    parse_end_call_reason, DecisionParser, KeywordHeuristics, TerminationDecision, Terminator,
};
pub use result::{shorten_reason, DialogueResult, MAX_TURNS_REASON};
pub use state::{DialoguePhase, DialogueSession, IllegalTransition, PhaseTransition};
pub use transcript::{
    strip_end_call_marker, ChatMessage, ChatRole, Speaker, Transcript, Utterance,
    END_CALL_MARKER, TERMINATE_MARKER,
};
