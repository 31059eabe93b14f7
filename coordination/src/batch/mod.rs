//! Batch generation planning: which dialogues to run, what to write for
//! each one, and how the finished batch is distributed.
//!
//! Execution (the bounded worker pool) lives in the runtime crate; everything
//! here is deterministic given an RNG.

pub mod plan;
pub mod record;
pub mod stats;

pub use plan::{
    distribute, plan_tasks, AgeBracket, Awareness, DialogueLabel, DialogueTask, PersonaSpace,
    PlanError, AGE_BRACKETS, EVERYDAY_CATEGORIES, FRAUD_CATEGORIES, OCCUPATIONS,
};
pub use record::{FailedTask, SummaryRecord};
pub use stats::DistributionStats;
