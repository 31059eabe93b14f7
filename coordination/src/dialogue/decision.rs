//! Termination decisions produced by the adjudicator, and the parser that
//! turns a raw model reply into one.
//!
//! # Parse chain
//!
//! ```text
//! reply
//!   ├─ balanced-brace JSON object found     → fields read, defaults fill gaps
//!   ├─ whole reply is a JSON object         → same
//!   └─ neither                              → keyword heuristic, fallback_used = true
//! ```
//!
//! The chain never fails. The keyword sets are configuration, not contract.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extract::find_json_object;

/// Who ends the call.
///
/// `None` is only used in results that ended by exhausting the turn budget;
/// it serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Terminator {
    #[serde(rename = "left")]
    Initiator,
    #[serde(rename = "right")]
    Responder,
    #[default]
    #[serde(rename = "natural")]
    Natural,
    #[serde(rename = "endcall")]
    EndCall,
    #[serde(rename = "")]
    None,
}

impl Terminator {
    /// Lenient parse of an adjudicator-supplied label. Unknown labels map to
    /// `Natural`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "left" | "initiator" | "caller" => Self::Initiator,
            "right" | "responder" | "callee" | "user" => Self::Responder,
            "endcall" | "end_call" | "hangup" | "hang_up" => Self::EndCall,
            "" => Self::None,
            _ => Self::Natural,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "left",
            Self::Responder => "right",
            Self::Natural => "natural",
            Self::EndCall => "endcall",
            Self::None => "",
        }
    }
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One adjudication round's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationDecision {
    pub should_terminate: bool,
    pub terminator: Terminator,
    pub reason: String,
    /// Set when the reply carried no usable JSON and keywords were used.
    #[serde(default)]
    pub fallback_used: bool,
}

/// Reason used when the JSON verdict omits one.
pub const DEFAULT_DECISION_REASON: &str =
    "Unable to determine termination reason, defaulting to continue dialogue.";

impl TerminationDecision {
    /// Continue the call.
    pub fn continue_call(reason: impl Into<String>) -> Self {
        Self {
            should_terminate: false,
            terminator: Terminator::Natural,
            reason: reason.into(),
            fallback_used: false,
        }
    }

    /// Build from a parsed JSON object, defaulting missing fields.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let should_terminate = match map.get("should_terminate") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")
            }
            _ => false,
        };
        let terminator = map
            .get("terminator")
            .and_then(Value::as_str)
            .map(Terminator::from_label)
            .filter(|t| *t != Terminator::None)
            .unwrap_or(Terminator::Natural);
        let reason = map
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_DECISION_REASON.to_string());

        Self {
            should_terminate,
            terminator,
            reason,
            fallback_used: false,
        }
    }
}

/// Keyword sets for the heuristic fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordHeuristics {
    /// Phrases that mean "end the call". Only the first `scan_chars`
    /// characters of the reply are searched.
    pub affirmative: Vec<String>,
    pub initiator: Vec<String>,
    pub responder: Vec<String>,
    pub scan_chars: usize,
}

impl Default for KeywordHeuristics {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            affirmative: owned(&["yes", "should terminate", "need to terminate", "should end"]),
            initiator: owned(&["left", "caller ends", "service terminates", "initiator"]),
            responder: owned(&["right", "user terminates", "callee ends", "responder"]),
            scan_chars: 100,
        }
    }
}

/// Case-insensitive alternation over a keyword list.
///
/// ASCII keywords match on word boundaries; others (e.g. CJK) match as plain
/// substrings since those scripts do not separate words with spaces.
#[derive(Debug, Clone)]
struct KeywordSet(Option<Regex>);

impl KeywordSet {
    fn compile(words: &[String]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| {
                let escaped = regex::escape(w.trim());
                if w.trim().is_ascii() {
                    format!(r"\b{escaped}\b")
                } else {
                    escaped
                }
            })
            .collect();
        if alternatives.is_empty() {
            return Ok(Self(None));
        }
        let pattern = format!("(?i)(?:{})", alternatives.join("|"));
        Ok(Self(Some(Regex::new(&pattern)?)))
    }

    fn is_match(&self, text: &str) -> bool {
        self.0.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Turns adjudicator replies into decisions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DecisionParser {
    affirmative: KeywordSet,
    initiator: KeywordSet,
    responder: KeywordSet,
    scan_chars: usize,
}

impl DecisionParser {
    pub fn new(heuristics: &KeywordHeuristics) -> Result<Self, regex::Error> {
        Ok(Self {
            affirmative: KeywordSet::compile(&heuristics.affirmative)?,
            initiator: KeywordSet::compile(&heuristics.initiator)?,
            responder: KeywordSet::compile(&heuristics.responder)?,
            scan_chars: heuristics.scan_chars,
        })
    }

    /// Parse a reply. Never fails.
    pub fn parse(&self, reply: &str) -> TerminationDecision {
        match find_json_object(reply) {
            Some(map) => TerminationDecision::from_json(&map),
            None => {
                tracing::warn!(
                    reply_len = reply.len(),
                    "Adjudicator reply had no JSON verdict, using keyword fallback"
                );
                self.heuristic(reply)
            }
        }
    }

    /// Keyword classification of a reply with no JSON in it.
    pub fn heuristic(&self, reply: &str) -> TerminationDecision {
        let head: String = reply.chars().take(self.scan_chars).collect();
        let should_terminate = self.affirmative.is_match(&head);

        let terminator = if self.initiator.is_match(reply) {
            Terminator::Initiator
        } else if self.responder.is_match(reply) {
            Terminator::Responder
        } else {
            Terminator::Natural
        };

        TerminationDecision {
            should_terminate,
            terminator,
            reason: reply.to_string(),
            fallback_used: true,
        }
    }
}

/// Reason for a self-initiated hang-up, from the adjudicator's post-hoc
/// explanation reply. `who` names the party that hung up.
pub fn parse_end_call_reason(reply: &str, who: &str) -> String {
    match find_json_object(reply) {
        Some(map) => map
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{who} actively hung up, reason unclear.")),
        None => format!("{who} actively hung up. {reply}"),
    }
}
