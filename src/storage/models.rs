use crate::common::ConversationSummary;
use crate::messaging::ConversationKey;

/// Denormalized per-participant index entry behind the conversation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub participant: String,
    pub conversation_key: ConversationKey,
    pub other_participant: String,
    pub last_message: String,
    pub last_sender: String,
    pub last_message_at: i64,
}

impl From<DirectoryRecord> for ConversationSummary {
    fn from(record: DirectoryRecord) -> Self {
        ConversationSummary {
            key: record.conversation_key,
            other_participant: record.other_participant,
            last_message: record.last_message,
            last_sender: record.last_sender,
            last_message_at: record.last_message_at,
        }
    }
}

/// Shape of an ordered message query: the newest `limit` messages older than
/// `before`, returned oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn latest(limit: Option<usize>) -> Self {
        Self {
            before: None,
            limit,
        }
    }

    pub fn page(before: i64, limit: usize) -> Self {
        Self {
            before: Some(before),
            limit: Some(limit),
        }
    }
}
