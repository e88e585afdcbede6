use std::sync::Arc;

use super::resolver::validate_participant;
use super::subscription::{Subscription, spawn_snapshot_listener};
use crate::common::{ChatMessage, ConversationSummary};
use crate::error::{ChatError, ChatResult};
use crate::storage::{ConversationStore, DirectoryRecord, StoreChange, run_blocking};

/// Lists the conversations a participant takes part in, newest first.
pub struct ConversationDirectory {
    store: Arc<dyn ConversationStore>,
}

impl ConversationDirectory {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Push the participant's full, sorted summary list now and after every
    /// change to it.
    pub fn list_for_participant<U, E>(
        &self,
        participant: &str,
        on_update: U,
        on_error: E,
    ) -> ChatResult<Subscription>
    where
        U: FnMut(Vec<ConversationSummary>) + Send + 'static,
        E: FnOnce(ChatError) + Send + 'static,
    {
        validate_participant(participant)?;

        let owner = participant.to_string();
        let watched = participant.to_string();
        Ok(spawn_snapshot_listener(
            Arc::clone(&self.store),
            format!("directory:{participant}"),
            move |store| Ok(summaries(store.list_directory(&owner)?)),
            move |change| matches!(change, StoreChange::Directory(p) if *p == watched),
            on_update,
            on_error,
        ))
    }

    /// One-shot read of the same list.
    pub async fn snapshot(&self, participant: &str) -> ChatResult<Vec<ConversationSummary>> {
        validate_participant(participant)?;

        let owner = participant.to_string();
        let records = run_blocking(&self.store, move |store| store.list_directory(&owner))
            .await
            .map_err(ChatError::StoreUnavailable)?;
        Ok(summaries(records))
    }
}

fn summaries(records: Vec<DirectoryRecord>) -> Vec<ConversationSummary> {
    records.into_iter().map(ConversationSummary::from).collect()
}

/// Both participants' directory entries after `message` was stored.
pub(crate) fn records_for(message: &ChatMessage) -> [DirectoryRecord; 2] {
    let entry = |participant: &str, other: &str| DirectoryRecord {
        participant: participant.to_string(),
        conversation_key: message.conversation_key.clone(),
        other_participant: other.to_string(),
        last_message: message.body.clone(),
        last_sender: message.sender.clone(),
        last_message_at: message.created_at,
    };

    [
        entry(&message.sender, &message.recipient),
        entry(&message.recipient, &message.sender),
    ]
}
