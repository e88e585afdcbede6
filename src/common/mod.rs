pub mod commands;
pub mod events;
pub mod types;

pub use commands::ConsoleCommand;
pub use events::ChatEvent;
pub use types::{ChatMessage, ConversationSummary, MessageId, NewMessage};
