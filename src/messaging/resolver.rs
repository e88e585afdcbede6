use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Reserved between the two participant ids of a key; never valid inside an id.
pub const KEY_SEPARATOR: char = '|';

/// Canonical identifier of a two-party conversation.
///
/// Always `lo|hi` with `lo < hi`, so the same pair yields the same key in
/// either argument order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Parse a key previously produced by [`resolve`].
    pub fn parse(raw: &str) -> ChatResult<Self> {
        let Some((lo, hi)) = raw.split_once(KEY_SEPARATOR) else {
            return Err(ChatError::InvalidIdentifier(raw.to_string()));
        };
        validate_participant(lo).map_err(|_| ChatError::InvalidIdentifier(raw.to_string()))?;
        validate_participant(hi).map_err(|_| ChatError::InvalidIdentifier(raw.to_string()))?;
        if lo >= hi {
            return Err(ChatError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn participants(&self) -> (&str, &str) {
        // Construction guarantees exactly one separator.
        self.0
            .split_once(KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    pub fn involves(&self, participant: &str) -> bool {
        let (lo, hi) = self.participants();
        lo == participant || hi == participant
    }

    /// The participant on the other side of `me`, if `me` is in this conversation.
    pub fn other(&self, me: &str) -> Option<&str> {
        match self.participants() {
            (lo, hi) if lo == me => Some(hi),
            (lo, hi) if hi == me => Some(lo),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for ConversationKey {
    type Err = ChatError;

    fn from_str(raw: &str) -> ChatResult<Self> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = ChatError;

    fn try_from(raw: String) -> ChatResult<Self> {
        Self::parse(&raw)
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.0
    }
}

/// Reject ids that are empty or would make a key ambiguous.
pub fn validate_participant(id: &str) -> ChatResult<()> {
    if id.is_empty() || id.contains(KEY_SEPARATOR) {
        return Err(ChatError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Derive the conversation key for two distinct participants.
pub fn resolve(a: &str, b: &str) -> ChatResult<ConversationKey> {
    validate_participant(a)?;
    validate_participant(b)?;
    if a == b {
        return Err(ChatError::InvalidParticipants(format!(
            "{a:?} cannot converse with itself"
        )));
    }

    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    Ok(ConversationKey(format!("{lo}{KEY_SEPARATOR}{hi}")))
}
