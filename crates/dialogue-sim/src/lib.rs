//! Phone-call dialogue simulator.
//!
//! Two language-model agents (initiator and responder) talk in turns while a
//! third (the adjudicator) decides when the call is over. Batches of calls
//! are generated concurrently over a persona cross-product, rendered to
//! speech per line and merged into stereo tracks.
//!
//! Deterministic pieces (transcript, decision parsing, phase machine,
//! planning, retry arithmetic) live in the `coordination` crate; this crate
//! adds the async runtime side.

pub mod agents;
pub mod audio_merge;
pub mod batch;
pub mod completion;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod speech;
pub mod telemetry;
