//! Dialogue coordination library
//!
//! Deterministic building blocks of the call simulator:
//! - `dialogue`: transcript, end-of-call marker handling, per-party prompt
//!   views, termination decisions and their parser, the phase state machine
//!   and the frozen run result
//! - `resilience`: retry policy and backoff schedule
//! - `batch`: persona cross-product planning, summary records and
//!   distribution statistics
//!
//! Nothing here performs I/O or depends on an async runtime.

pub mod batch;
pub mod dialogue;
pub mod resilience;
