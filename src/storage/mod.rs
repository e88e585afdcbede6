pub mod database;
pub mod models;
pub mod sqlite_store;

pub use models::{DirectoryRecord, MessageQuery};
pub use sqlite_store::{SqliteStore, spawn_change_watcher};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::common::{ChatMessage, NewMessage};
use crate::error::{StoreError, StoreResult};
use crate::messaging::ConversationKey;

/// Published after a write commits, by this handle or (via the change log)
/// by another connection, so listeners can re-run their query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Messages(ConversationKey),
    Directory(String),
}

/// The document-store collaborator: ordered queries, a change feed and
/// store-assigned timestamps.
pub trait ConversationStore: Send + Sync {
    /// Append to the conversation, assigning id and timestamp.
    fn append_message(&self, key: &ConversationKey, input: NewMessage) -> StoreResult<ChatMessage>;

    /// Messages of one conversation, oldest first.
    fn list_messages(
        &self,
        key: &ConversationKey,
        query: MessageQuery,
    ) -> StoreResult<Vec<ChatMessage>>;

    /// Insert or refresh a directory record. An existing record is only
    /// replaced by one that is not older.
    fn upsert_directory_record(&self, record: &DirectoryRecord) -> StoreResult<()>;

    /// Directory records of one participant, newest first.
    fn list_directory(&self, participant: &str) -> StoreResult<Vec<DirectoryRecord>>;

    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// Run a synchronous store operation off the async executor.
pub async fn run_blocking<T, F>(store: &Arc<dyn ConversationStore>, op: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ConversationStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|err| StoreError::Worker(err.to_string()))?
}

/// Ensure the directory holding a database file exists.
pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
