//! Transcript store: the ordered, indexed log of conversational turns.
//!
//! A turn's identity is its index. Turns are never removed individually; the
//! only mutations are appending, replacing the content of an existing turn and
//! resetting the whole log back to its system turn. The order of the log is the
//! order turns are shown, exported and submitted to the completion service, so
//! an index taken from any of those views addresses the same turn.
//!
//! ## Wire shape
//!
//! ```text
//! { "role": "user", "content": "plain text" }
//! { "role": "user", "content": [ { "type": "text",  "value": "what is this?" },
//!                                { "type": "image", "encodedValue": "iVBOR…",
//!                                  "mimeType": "image/png" } ] }
//! ```

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One element of a structured content list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        value: String,
    },
    Image {
        #[serde(rename = "encodedValue")]
        encoded_value: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// The content of a turn: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

impl Content {
    /// The text a reader sees for this turn, or `None` for an image-only turn.
    ///
    /// Text parts are joined with a newline in their stored order.
    pub fn display_text(&self) -> Option<String> {
        match self {
            Content::Text(s) => Some(s.clone()),
            Content::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { value } => Some(value.as_str()),
                        Part::Image { .. } => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }

    /// Number of image parts carried by this turn.
    pub fn image_count(&self) -> usize {
        match self {
            Content::Text(_) => 0,
            Content::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, Part::Image { .. }))
                .count(),
        }
    }
}

/// One entry of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Content,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(text.into()),
        }
    }

    pub fn user(content: Content) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }
}

/// Ordered log of turns with a mandatory system turn at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Start a transcript holding only the system turn.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
        }
    }

    /// Rebuild a transcript from a previously serialised turn list.
    ///
    /// The list must start with the one and only system turn.
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self, ChatError> {
        match turns.first() {
            Some(t) if t.role == Role::System => {}
            Some(t) => {
                return Err(ChatError::InvalidHistory(format!(
                    "turn 0 must be the system turn, found a {} turn",
                    t.role
                )))
            }
            None => return Err(ChatError::InvalidHistory("history is empty".into())),
        }
        if let Some(pos) = turns.iter().skip(1).position(|t| t.role == Role::System) {
            return Err(ChatError::InvalidHistory(format!(
                "turn {} is a second system turn",
                pos + 1
            )));
        }
        Ok(Self { turns })
    }

    /// Append a user or assistant turn and return its index.
    pub fn append(&mut self, turn: Turn) -> Result<usize, ChatError> {
        if turn.role == Role::System {
            return Err(ChatError::InvalidHistory(
                "the transcript already has its system turn".into(),
            ));
        }
        self.turns.push(turn);
        Ok(self.turns.len() - 1)
    }

    pub fn get(&self, index: usize) -> Result<&Turn, ChatError> {
        self.turns.get(index).ok_or(ChatError::TurnNotFound {
            index,
            len: self.turns.len(),
        })
    }

    /// Replace the content of an existing turn.
    pub fn set_content(&mut self, index: usize, content: Content) -> Result<(), ChatError> {
        if index == 0 {
            return Err(ChatError::ImmutableTurn { index });
        }
        let len = self.turns.len();
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(ChatError::TurnNotFound { index, len })?;
        turn.content = content;
        Ok(())
    }

    /// Drop every turn except the system turn.
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }

    /// Number of turns, system turn included. Never zero.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> &Turn {
        // turn 0 always exists
        &self.turns[self.turns.len() - 1]
    }

    /// The ordered `{role, content}` list used for requests and exports.
    pub fn to_serializable(&self) -> &[Turn] {
        &self.turns
    }
}
