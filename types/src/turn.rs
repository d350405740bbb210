//! Conversation turn domain model.
//!
//! A `Turn` is one message exchanged in a conversation. Turns are immutable
//! once constructed; content is an ordered sequence of parts so that a
//! single turn can mix text with binary attachments.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{EmptyTextError, NonEmptyString};

/// The speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of a turn's content.
///
/// Binary parts carry their raw bytes; the core never loads files itself,
/// so callers hand over already-loaded data together with a media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: NonEmptyString,
    },
    Image {
        media_type: String,
        data: Vec<u8>,
    },
    Audio {
        media_type: String,
        data: Vec<u8>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Ok(Self::Text {
            text: NonEmptyString::new(text)?,
        })
    }

    #[must_use]
    pub fn image(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Image {
            media_type: media_type.into(),
            data,
        }
    }

    #[must_use]
    pub fn audio(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Audio {
            media_type: media_type.into(),
            data,
        }
    }
}

/// One message exchanged in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    parts: Vec<ContentPart>,
    timestamp: SystemTime,
}

impl Turn {
    #[must_use]
    pub fn new(role: Role, parts: Vec<ContentPart>, timestamp: SystemTime) -> Self {
        Self {
            role,
            parts,
            timestamp,
        }
    }

    /// Single-text-part turn stamped with the current time.
    pub fn text(role: Role, text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Ok(Self::new(
            role,
            vec![ContentPart::text(text)?],
            SystemTime::now(),
        ))
    }

    pub fn try_user(text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Self::text(Role::User, text)
    }

    pub fn try_assistant(text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Self::text(Role::Assistant, text)
    }

    pub fn try_system(text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Self::text(Role::System, text)
    }

    pub fn try_tool(text: impl Into<String>) -> Result<Self, EmptyTextError> {
        Self::text(Role::Tool, text)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Concatenated text of all text parts, newline-joined.
    ///
    /// Binary parts are skipped; a turn that is all attachments yields an
    /// empty string.
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text.as_str());
            }
        }
        out
    }
}
