//! Unified dialogue transcript and the per-party prompt views derived from it.
//!
//! The transcript is the only record of what was said. Each speaking agent
//! builds its prompt history from it on demand: its own utterances become
//! `assistant` entries and the other party's become `user` entries. Nothing
//! has to be mirrored between agents by hand.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Literal token an agent emits to hang up on its own.
pub const END_CALL_MARKER: &str = "##ENDCALL_SIGNAL##";

/// Literal token closing instructions carry so a model knows the call ends.
pub const TERMINATE_MARKER: &str = "##TERMINATE_SIGNAL##";

/// One of the two talking parties.
///
/// Serialized as `left` / `right`, the channel each party is panned to when
/// the call is rendered to audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Speaker {
    /// Opens the call and drives it toward a goal.
    #[serde(rename = "left")]
    Initiator,
    /// Reacts to the initiator.
    #[serde(rename = "right")]
    Responder,
}

impl Speaker {
    pub fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    /// Channel label used in output artifacts.
    pub fn side(self) -> &'static str {
        match self {
            Self::Initiator => "left",
            Self::Responder => "right",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// A single line of the call. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Speaker,
    pub content: String,
    /// Unix time in seconds with millisecond precision.
    pub timestamp: f64,
}

impl Utterance {
    pub fn new(role: Speaker, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn contains_end_call(&self) -> bool {
        self.content.contains(END_CALL_MARKER)
    }
}

/// Remove every occurrence of the end-of-call marker. Idempotent.
pub fn strip_end_call_marker(text: &str) -> String {
    text.replace(END_CALL_MARKER, "")
}

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered record of the whole call, including closing turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    utterances: Vec<Utterance>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return a reference to it.
    pub fn push(&mut self, role: Speaker, content: impl Into<String>) -> &Utterance {
        self.utterances.push(Utterance::new(role, content));
        &self.utterances[self.utterances.len() - 1]
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.utterances.last()
    }

    /// Strip the end-of-call marker from every line.
    ///
    /// Returns how many lines changed; a second call always returns 0.
    pub fn strip_end_call_markers(&mut self) -> usize {
        let mut changed = 0;
        for utterance in &mut self.utterances {
            if utterance.contains_end_call() {
                utterance.content = strip_end_call_marker(&utterance.content);
                changed += 1;
            }
        }
        changed
    }

    /// All lines of one party, in order.
    pub fn side_texts(&self, speaker: Speaker) -> Vec<String> {
        self.utterances
            .iter()
            .filter(|u| u.role == speaker)
            .map(|u| u.content.clone())
            .collect()
    }

    /// Whether any line contains `needle`.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.utterances.iter().any(|u| u.content.contains(needle))
    }

    /// Render as `Label: text` lines, one per utterance.
    pub fn render_labeled(&self, initiator_label: &str, responder_label: &str) -> String {
        self.utterances
            .iter()
            .map(|u| {
                let label = match u.role {
                    Speaker::Initiator => initiator_label,
                    Speaker::Responder => responder_label,
                };
                format!("{label}: {}", u.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Prompt history of the call as seen by `speaker`.
    ///
    /// Starts with `system_prompt`; own lines become `assistant`, the other
    /// party's become `user`. Consecutive lines with the same relabeled role
    /// are joined so the history always alternates.
    pub fn perspective(&self, speaker: Speaker, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt)];
        for utterance in &self.utterances {
            let role = if utterance.role == speaker {
                ChatRole::Assistant
            } else {
                ChatRole::User
            };
            push_coalesced(&mut messages, role, &utterance.content);
        }
        messages
    }

    /// Like [`Transcript::perspective`] with a trailing instruction appended as
    /// a `user` entry. The instruction is never part of the transcript.
    pub fn perspective_with_instruction(
        &self,
        speaker: Speaker,
        system_prompt: &str,
        instruction: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = self.perspective(speaker, system_prompt);
        push_coalesced(&mut messages, ChatRole::User, instruction);
        messages
    }
}

fn push_coalesced(messages: &mut Vec<ChatMessage>, role: ChatRole, content: &str) {
    match messages.last_mut() {
        Some(last) if last.role == role && role != ChatRole::System => {
            last.content.push_str("\n\n");
            last.content.push_str(content);
        }
        _ => messages.push(ChatMessage {
            role,
            content: content.to_string(),
        }),
    }
}
