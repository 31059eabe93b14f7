//! Dialogue phase state machine: phases, legal transitions, and the
//! per-run session that records them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a single dialogue run.
///
/// Every run starts in `Running` and ends in `Done`. Exactly one of the three
/// exit phases is visited on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialoguePhase {
    /// Parties are exchanging turns.
    Running,
    /// A party emitted the end-of-call marker.
    EndCallDetected,
    /// The adjudicator decided the call should end; closing exchange follows.
    ManagerTerminated,
    /// The turn budget ran out with no termination signal.
    MaxTurnsReached,
    /// Result frozen.
    Done,
}

impl DialoguePhase {
    /// Valid transitions from this phase.
    ///
    /// ```text
    /// Running → EndCallDetected | ManagerTerminated | MaxTurnsReached
    /// EndCallDetected | ManagerTerminated | MaxTurnsReached → Done
    /// ```
    pub fn valid_transitions(self) -> &'static [DialoguePhase] {
        match self {
            Self::Running => &[
                Self::EndCallDetected,
                Self::ManagerTerminated,
                Self::MaxTurnsReached,
            ],
            Self::EndCallDetected | Self::ManagerTerminated | Self::MaxTurnsReached => {
                &[Self::Done]
            }
            Self::Done => &[],
        }
    }
}

impl std::fmt::Display for DialoguePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::EndCallDetected => write!(f, "end_call_detected"),
            Self::ManagerTerminated => write!(f, "manager_terminated"),
            Self::MaxTurnsReached => write!(f, "max_turns_reached"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DialoguePhase,
    pub to: DialoguePhase,
    /// Completed exchanges at the time of the transition.
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid phase transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}")]
pub struct IllegalTransition {
    pub from: DialoguePhase,
    pub to: DialoguePhase,
}

/// Tracks the phase, turn counter and transition log of one dialogue run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSession {
    pub id: String,
    pub phase: DialoguePhase,
    /// Completed responder/initiator exchange pairs.
    pub turn_count: u32,
    pub max_turns: u32,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
}

impl DialogueSession {
    pub fn new(id: &str, max_turns: u32) -> Self {
        Self {
            id: id.to_string(),
            phase: DialoguePhase::Running,
            turn_count: 0,
            max_turns,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: DialoguePhase, reason: &str) -> Result<(), IllegalTransition> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(IllegalTransition {
                from: self.phase,
                to,
            });
        }

        tracing::debug!(
            dialogue_id = %self.id,
            from = %self.phase,
            to = %to,
            turn = self.turn_count,
            "Dialogue phase transition"
        );

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            turn: self.turn_count,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Whether another exchange may start.
    pub fn has_turns_remaining(&self) -> bool {
        self.phase == DialoguePhase::Running && self.turn_count < self.max_turns
    }

    /// Count one completed exchange. Saturates at `max_turns`.
    pub fn complete_exchange(&mut self) {
        if self.turn_count < self.max_turns {
            self.turn_count += 1;
        }
    }

    /// Freeze the session.
    pub fn finish(&mut self) -> Result<(), IllegalTransition> {
        self.transition(DialoguePhase::Done, "result frozen")
    }

    pub fn status_line(&self) -> String {
        format!(
            "[{}] turn {}/{} | {} transitions | id={}",
            self.phase,
            self.turn_count,
            self.max_turns,
            self.transitions.len(),
            self.id
        )
    }
}
