//! Per-dialogue output records.

use serde::{Deserialize, Serialize};

use super::plan::{Awareness, DialogueTask};
use crate::dialogue::{DialogueResult, Speaker, Terminator};

/// One line of the summary JSONL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub tts_id: String,
    /// Initiator lines, in order.
    pub left: Vec<String>,
    /// Responder lines, in order.
    pub right: Vec<String>,
    pub user_age: u8,
    pub user_awareness: Awareness,
    #[serde(rename = "fraud_type")]
    pub category: String,
    pub occupation: String,
    pub termination_reason: String,
    pub terminator: Terminator,
}

impl SummaryRecord {
    pub fn new(task: &DialogueTask, result: &DialogueResult) -> Self {
        Self {
            tts_id: task.id.clone(),
            left: result.side_texts(Speaker::Initiator),
            right: result.side_texts(Speaker::Responder),
            user_age: task.user_age,
            user_awareness: task.awareness,
            category: task.category.clone(),
            occupation: task.occupation.clone(),
            termination_reason: result.summary_reason(),
            terminator: result.terminator,
        }
    }
}

/// A run that produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub tts_id: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::batch::plan::{AgeBracket, DialogueLabel};
    use crate::dialogue::Transcript;

    #[test]
    fn test_record_from_result() {
        let task = DialogueTask {
            id: "tts_fraud_00003".into(),
            label: DialogueLabel::Fraud,
            age_bracket: AgeBracket::new(56, 70),
            user_age: 61,
            awareness: Awareness::Low,
            category: "lottery prize".into(),
            occupation: "retiree".into(),
        };
        let mut history = Transcript::new();
        history.push(Speaker::Initiator, "You won a prize!");
        history.push(Speaker::Responder, "Really?");
        history.push(Speaker::Initiator, "Just pay the fee.");
        let result = DialogueResult {
            id: task.id.clone(),
            history,
            turn_count: 1,
            terminated_by_manager: false,
            end_call_signal_detected: false,
            termination_reason: String::new(),
            terminator: Terminator::None,
            conclusion_messages: Vec::new(),
            reached_max_turns: true,
            fallback_decisions: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let record = SummaryRecord::new(&task, &result);
        assert_eq!(record.left, vec!["You won a prize!", "Just pay the fee."]);
        assert_eq!(record.right, vec!["Really?"]);
        assert_eq!(record.termination_reason, "Reached maximum turns");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fraud_type"], "lottery prize");
        assert_eq!(json["user_awareness"], "low");
        assert_eq!(json["terminator"], "");
    }
}
