use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::ConversationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A persisted chat message. Immutable once the store has assigned `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_key: ConversationKey,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    /// Store-assigned, microseconds since the Unix epoch.
    pub created_at: i64,
}

impl ChatMessage {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.created_at)
    }
}

/// What a caller hands the store; the store fills in id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: String,
    pub recipient: String,
    pub body: String,
}

/// Read-only preview of one conversation from a participant's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub other_participant: String,
    pub last_message: String,
    pub last_sender: String,
    pub last_message_at: i64,
}

impl ConversationSummary {
    pub fn last_message_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.last_message_at)
    }
}
