//! Core domain types for engram.
//!
//! This crate contains pure domain types with no IO and no async.
//! Everything here can be used from any layer of the enclosing application.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod ids;
mod turn;

pub use ids::{SessionId, TurnSeq};
pub use turn::{ContentPart, Role, Turn};

/// A string guaranteed to be non-empty (after trimming).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

#[derive(Debug, Error)]
#[error("text content must not be empty")]
pub struct EmptyTextError;

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyTextError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyTextError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn append(mut self, suffix: impl AsRef<str>) -> Self {
        self.0.push_str(suffix.as_ref());
        Self(self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = EmptyTextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::NonEmptyString;

    #[test]
    fn non_empty_accepts_text() {
        let s = NonEmptyString::new("hello").expect("non-empty");
        assert_eq!(s.as_str(), "hello");
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert!(NonEmptyString::new("   ").is_err());
        assert!(NonEmptyString::new("").is_err());
    }

    #[test]
    fn append_preserves_invariant() {
        let s = NonEmptyString::new("a").expect("non-empty").append("b");
        assert_eq!(s.as_str(), "ab");
    }

    #[test]
    fn serde_round_trip() {
        let s = NonEmptyString::new("note").expect("non-empty");
        let json = serde_json::to_string(&s).expect("serialize");
        let back: NonEmptyString = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(s, back);
    }

    #[test]
    fn serde_rejects_empty() {
        let result: Result<NonEmptyString, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }
}
