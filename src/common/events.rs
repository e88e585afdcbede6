use super::types::{ChatMessage, ConversationSummary};

/// Pushed from live subscriptions to the console.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Full ordered message list of the open conversation.
    MessagesUpdated(Vec<ChatMessage>),
    /// Full directory of the acting participant, newest first.
    InboxUpdated(Vec<ConversationSummary>),
    /// The conversation listener failed; the caller has to re-subscribe.
    MessagesDisconnected(String),
    InboxDisconnected(String),
}
