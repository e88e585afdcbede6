use crate::common::{ChatEvent, ChatMessage, ConversationSummary};
use crate::messaging::ConversationKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Live,
    /// The listener errored; shown until the user reconnects.
    Disconnected(String),
}

impl LinkStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LinkStatus::Live)
    }
}

/// Local state of one open conversation in the console.
pub struct ConsoleState {
    pub me: String,
    pub peer: String,
    pub key: ConversationKey,
    /// Latest live snapshot, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Pages fetched with `/older`, all older than `messages`.
    pub earlier: Vec<ChatMessage>,
    /// Compose box; only cleared once a send succeeds.
    pub input_text: String,
    pub inbox: Vec<ConversationSummary>,
    pub conversation_link: LinkStatus,
    pub inbox_link: LinkStatus,
}

impl ConsoleState {
    pub fn new(me: String, peer: String, key: ConversationKey) -> Self {
        Self {
            me,
            peer,
            key,
            messages: Vec::new(),
            earlier: Vec::new(),
            input_text: String::new(),
            inbox: Vec::new(),
            conversation_link: LinkStatus::Live,
            inbox_link: LinkStatus::Live,
        }
    }

    pub fn apply_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::MessagesUpdated(messages) => {
                if let Some(first) = messages.first() {
                    let cutoff = first.created_at;
                    // A snapshot can reach further back than an earlier page.
                    self.earlier.retain(|message| message.created_at < cutoff);
                    // Once older pages are loaded, messages sliding out of a
                    // limited window join them instead of leaving a gap.
                    if !self.earlier.is_empty() {
                        let slid_out = self
                            .messages
                            .drain(..)
                            .filter(|message| message.created_at < cutoff);
                        self.earlier.extend(slid_out);
                    }
                }
                self.messages = messages;
                self.conversation_link = LinkStatus::Live;
            }
            ChatEvent::InboxUpdated(inbox) => {
                self.inbox = inbox;
                self.inbox_link = LinkStatus::Live;
            }
            ChatEvent::MessagesDisconnected(reason) => {
                self.conversation_link = LinkStatus::Disconnected(reason);
            }
            ChatEvent::InboxDisconnected(reason) => {
                self.inbox_link = LinkStatus::Disconnected(reason);
            }
        }
    }

    pub fn stage_input(&mut self, text: String) {
        self.input_text = text;
    }

    pub fn mark_sent(&mut self) {
        self.input_text.clear();
    }

    pub fn has_pending_input(&self) -> bool {
        !self.input_text.trim().is_empty()
    }

    /// Everything on screen, oldest first.
    pub fn timeline(&self) -> impl Iterator<Item = &ChatMessage> {
        self.earlier.iter().chain(self.messages.iter())
    }

    /// Timestamp to page back from with `/older`.
    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.timeline().next().map(|message| message.created_at)
    }

    pub fn prepend_history(&mut self, mut page: Vec<ChatMessage>) {
        page.append(&mut self.earlier);
        self.earlier = page;
    }

    pub fn status_line(&self) -> String {
        match &self.conversation_link {
            LinkStatus::Live => format!("{} <-> {} ({})", self.me, self.peer, self.key),
            LinkStatus::Disconnected(reason) => {
                format!("disconnected — retry with /reconnect ({reason})")
            }
        }
    }
}
