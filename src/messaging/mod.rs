//! Conversation messaging core: key resolution, the message channel and the
//! per-participant conversation directory.

pub mod channel;
pub mod directory;
pub mod resolver;
pub mod subscription;

pub use channel::MessageChannel;
pub use directory::ConversationDirectory;
pub use resolver::{ConversationKey, KEY_SEPARATOR, resolve, validate_participant};
pub use subscription::{Subscription, SubscriptionState};
