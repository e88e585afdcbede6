#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parcelpro_chat::common::NewMessage;
use parcelpro_chat::messaging::ConversationKey;
use parcelpro_chat::storage::{DirectoryRecord, MessageQuery, StoreChange};
use parcelpro_chat::{ChatMessage, ConversationStore, SqliteStore, StoreError, StoreResult};
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

/// SQLite store with switchable outages.
pub struct FlakyStore {
    inner: SqliteStore,
    failing_appends: AtomicU32,
    fail_directory: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            failing_appends: AtomicU32::new(0),
            fail_directory: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Make the next `count` appends fail.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn set_directory_down(&self, down: bool) {
        self.fail_directory.store(down, Ordering::SeqCst);
    }

    pub fn set_reads_down(&self, down: bool) {
        self.fail_reads.store(down, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.inner.message_count().unwrap()
    }

    fn outage(what: &str) -> StoreError {
        StoreError::Worker(format!("injected {what} outage"))
    }
}

impl ConversationStore for FlakyStore {
    fn append_message(&self, key: &ConversationKey, input: NewMessage) -> StoreResult<ChatMessage> {
        let remaining = self.failing_appends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_appends.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::outage("append"));
        }
        self.inner.append_message(key, input)
    }

    fn list_messages(
        &self,
        key: &ConversationKey,
        query: MessageQuery,
    ) -> StoreResult<Vec<ChatMessage>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::outage("read"));
        }
        self.inner.list_messages(key, query)
    }

    fn upsert_directory_record(&self, record: &DirectoryRecord) -> StoreResult<()> {
        if self.fail_directory.load(Ordering::SeqCst) {
            return Err(Self::outage("directory"));
        }
        self.inner.upsert_directory_record(record)
    }

    fn list_directory(&self, participant: &str) -> StoreResult<Vec<DirectoryRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::outage("read"));
        }
        self.inner.list_directory(participant)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes()
    }
}

/// Receive until `done` accepts a value, failing the test after [`WAIT`].
pub async fn wait_for<T, F>(rx: &mut mpsc::UnboundedReceiver<T>, mut done: F) -> T
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let value = rx.recv().await.expect("listener hung up");
            if done(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for a snapshot")
}

pub fn bodies(messages: &[ChatMessage]) -> Vec<&str> {
    messages.iter().map(|message| message.body.as_str()).collect()
}
