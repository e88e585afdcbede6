use std::sync::Arc;

use super::directory::records_for;
use super::resolver::{ConversationKey, resolve};
use super::subscription::{Subscription, spawn_snapshot_listener};
use crate::common::{ChatMessage, MessageId, NewMessage};
use crate::error::{ChatError, ChatResult};
use crate::storage::{ConversationStore, MessageQuery, StoreChange, run_blocking};

/// Send and receive path for two-party conversations.
///
/// Sends are never retried here; a failed send is always reported to the
/// caller, who owns the retry policy.
pub struct MessageChannel {
    store: Arc<dyn ConversationStore>,
    snapshot_limit: Option<usize>,
}

impl MessageChannel {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            snapshot_limit: None,
        }
    }

    /// Cap every pushed snapshot to the newest `limit` messages.
    pub fn with_snapshot_limit(mut self, limit: Option<usize>) -> Self {
        self.snapshot_limit = limit;
        self
    }

    pub async fn send(
        &self,
        key: &ConversationKey,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> ChatResult<MessageId> {
        let expected = resolve(sender, recipient)?;
        if &expected != key {
            return Err(ChatError::InvalidParticipants(format!(
                "{key} is not the conversation between {sender:?} and {recipient:?}"
            )));
        }
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let input = NewMessage {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        };
        let target = key.clone();
        let message = run_blocking(&self.store, move |store| {
            store.append_message(&target, input)
        })
        .await
        .map_err(|err| {
            log::warn!("Send into {key} failed: {err}");
            ChatError::StoreUnavailable(err)
        })?;

        // The message is durable at this point; a failed preview only leaves
        // the directory stale until the next send.
        let records = records_for(&message);
        let refreshed = run_blocking(&self.store, move |store| {
            for record in &records {
                store.upsert_directory_record(record)?;
            }
            Ok(())
        })
        .await;
        if let Err(err) = refreshed {
            log::warn!("Directory preview for {key} is stale: {err}");
        }

        Ok(message.id)
    }

    /// Push the conversation's full ordered message list now and after every
    /// change to it.
    pub fn subscribe<U, E>(&self, key: &ConversationKey, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(Vec<ChatMessage>) + Send + 'static,
        E: FnOnce(ChatError) + Send + 'static,
    {
        let query = MessageQuery::latest(self.snapshot_limit);
        let listened = key.clone();
        let watched = key.clone();
        spawn_snapshot_listener(
            Arc::clone(&self.store),
            format!("conversation:{key}"),
            move |store| store.list_messages(&listened, query),
            move |change| matches!(change, StoreChange::Messages(k) if *k == watched),
            on_update,
            on_error,
        )
    }

    /// Up to `limit` messages strictly older than `before`, oldest first.
    pub async fn history(
        &self,
        key: &ConversationKey,
        before: Option<i64>,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let query = MessageQuery {
            before,
            limit: Some(limit),
        };
        let target = key.clone();
        run_blocking(&self.store, move |store| store.list_messages(&target, query))
            .await
            .map_err(ChatError::StoreUnavailable)
    }
}
