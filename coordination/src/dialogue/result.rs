//! Frozen outcome of one dialogue run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Terminator;
use super::transcript::{Speaker, Transcript, Utterance};

/// Reason recorded for runs that used up their turn budget.
pub const MAX_TURNS_REASON: &str = "Reached maximum turns";

/// Longest adjudicator reason kept verbatim in summary records.
pub const REASON_SUMMARY_CHARS: usize = 100;

/// Outcome of a dialogue run, serialized verbatim as the full transcript file.
///
/// The authoritative exit cause is `terminator` together with
/// `reached_max_turns`; the two boolean flags are kept for consumers that
/// read them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueResult {
    pub id: String,
    #[serde(rename = "dialogue_history")]
    pub history: Transcript,
    /// Completed responder/initiator exchanges. Never exceeds the budget.
    #[serde(rename = "turns")]
    pub turn_count: u32,
    pub terminated_by_manager: bool,
    pub end_call_signal_detected: bool,
    pub termination_reason: String,
    pub terminator: Terminator,
    /// Closing turns of the termination exchange, also present in `history`.
    pub conclusion_messages: Vec<Utterance>,
    pub reached_max_turns: bool,
    /// Adjudication rounds that fell back to keyword matching.
    #[serde(default)]
    pub fallback_decisions: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DialogueResult {
    /// Lines of one party, in order.
    pub fn side_texts(&self, speaker: Speaker) -> Vec<String> {
        self.history.side_texts(speaker)
    }

    /// Reason as written to summary records.
    ///
    /// Max-turn exits read [`MAX_TURNS_REASON`]; long adjudicator reasons are
    /// cut down with [`shorten_reason`].
    pub fn summary_reason(&self) -> String {
        if self.reached_max_turns {
            MAX_TURNS_REASON.to_string()
        } else if self.terminated_by_manager {
            shorten_reason(&self.termination_reason, REASON_SUMMARY_CHARS)
        } else {
            self.termination_reason.clone()
        }
    }

    /// Compact one-line summary for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} turns, {} lines, terminator={:?}, fallback_decisions={}",
            self.id,
            self.turn_count,
            self.history.len(),
            self.terminator.as_str(),
            self.fallback_decisions,
        )
    }
}

/// Shorten a reason longer than `limit` characters.
///
/// If a sentence ends within the first `limit` characters the first sentence
/// is kept (ASCII `.`, `!` and `?` only end a sentence before whitespace or
/// the end of the text), otherwise the first `limit` characters; either way `...` is
/// appended. Reasons within the limit are returned unchanged.
pub fn shorten_reason(reason: &str, limit: usize) -> String {
    if reason.chars().count() <= limit {
        return reason.to_string();
    }
    let head: String = reason.chars().take(limit).collect();
    let mut chars = reason.chars().peekable();
    let mut end = None;
    for (i, c) in head.char_indices() {
        chars.next();
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            end = Some(i);
            break;
        }
    }
    let cut = end.map_or(head.as_str(), |i| &head[..i]);
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(reason: &str) -> DialogueResult {
        let mut history = Transcript::new();
        history.push(Speaker::Initiator, "Hello");
        history.push(Speaker::Responder, "Hi");
        DialogueResult {
            id: "tts_fraud_00001".into(),
            history,
            turn_count: 1,
            terminated_by_manager: true,
            end_call_signal_detected: false,
            termination_reason: reason.into(),
            terminator: Terminator::Responder,
            conclusion_messages: Vec::new(),
            reached_max_turns: false,
            fallback_decisions: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_short_reason_unchanged() {
        assert_eq!(shorten_reason("Callee refused.", 100), "Callee refused.");
    }

    #[test]
    fn test_long_reason_cut_at_first_sentence() {
        let reason = format!("The callee saw through it. {}", "More detail. ".repeat(20));
        assert_eq!(shorten_reason(&reason, 100), "The callee saw through it...");
    }

    #[test]
    fn test_long_reason_without_sentence_break() {
        let reason = "a".repeat(150);
        let short = shorten_reason(&reason, 100);
        assert_eq!(short.len(), 103);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_decimal_point_is_not_a_sentence_break() {
        let reason = format!(
            "Asked for 2.5 million in fees and the callee refused outright. {}",
            "Further detail follows here. ".repeat(5)
        );
        assert_eq!(
            shorten_reason(&reason, 100),
            "Asked for 2.5 million in fees and the callee refused outright..."
        );
        let url = format!("See www.example.com for {}", "x".repeat(120));
        assert_eq!(shorten_reason(&url, 100).chars().count(), 103);
    }

    #[test]
    fn test_cjk_sentence_break() {
        let reason = format!("用户识破了骗局。{}", "细节".repeat(80));
        assert_eq!(shorten_reason(&reason, 100), "用户识破了骗局...");
    }

    #[test]
    fn test_summary_reason_variants() {
        let long = "x".repeat(120);
        let r = result(&long);
        assert_eq!(r.summary_reason(), format!("{}...", "x".repeat(100)));

        let mut r = result("whatever");
        r.reached_max_turns = true;
        r.terminated_by_manager = false;
        r.terminator = Terminator::None;
        assert_eq!(r.summary_reason(), MAX_TURNS_REASON);
    }

    #[test]
    fn test_end_call_reason_kept_whole() {
        let mut r = result("hung up");
        r.terminated_by_manager = false;
        r.end_call_signal_detected = true;
        r.terminator = Terminator::Initiator;
        // End-call reasons are never shortened.
        r.termination_reason = "y".repeat(150);
        assert_eq!(r.summary_reason().len(), 150);
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(result("r")).unwrap();
        assert!(value.get("dialogue_history").is_some());
        assert_eq!(value["turns"], 1);
        assert_eq!(value["terminator"], "right");
        assert_eq!(value["dialogue_history"][0]["role"], "left");
    }
}
