use std::fmt;

/// Identifies one conversation session. Sessions are fully independent;
/// no state is shared across them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic sequence number assigned to a turn when it is stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct TurnSeq(u64);

impl TurnSeq {
    #[must_use]
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionId, TurnSeq};

    #[test]
    fn session_id_display() {
        let id = SessionId::new("alpha");
        assert_eq!(id.to_string(), "alpha");
        assert_eq!(id.as_str(), "alpha");
    }

    #[test]
    fn turn_seq_ordering() {
        assert!(TurnSeq::new(1) < TurnSeq::new(2));
        assert_eq!(TurnSeq::new(7).value(), 7);
    }
}
