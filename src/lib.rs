//! Two-party conversation messaging for the ParcelPro admin dashboard.

pub mod common;
pub mod config;
pub mod console;
pub mod error;
pub mod messaging;
pub mod storage;

pub use common::{ChatMessage, ConversationSummary, MessageId};
pub use error::{ChatError, ChatResult, StoreError, StoreResult};
pub use messaging::{
    ConversationDirectory, ConversationKey, MessageChannel, Subscription, SubscriptionState,
    resolve,
};
pub use storage::{ConversationStore, SqliteStore, spawn_change_watcher};
