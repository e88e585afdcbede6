use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Result as SqlResult, Transaction, params};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::database::Database;
use super::models::{DirectoryRecord, MessageQuery};
use super::{ConversationStore, StoreChange};
use crate::common::{ChatMessage, MessageId, NewMessage};
use crate::error::{StoreError, StoreResult};
use crate::messaging::ConversationKey;

pub const DEFAULT_CHANGE_BUFFER: usize = 256;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Change log rows older than this are pruned on the next message write.
const CHANGE_LOG_RETENTION_MICROS: i64 = 24 * 60 * 60 * 1_000_000;

const KIND_MESSAGES: &str = "messages";
const KIND_DIRECTORY: &str = "directory";

/// SQLite-backed message store.
///
/// Every write also lands in the `change_log` table. Writes through this
/// handle are published on the change feed immediately; writes committed by
/// other connections to the same file are picked up by
/// [`SqliteStore::poll_external_changes`].
pub struct SqliteStore {
    db: Mutex<Database>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P, change_buffer: usize) -> StoreResult<Self> {
        let db = Database::new(path)?;
        Self::with_database(db, change_buffer)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::with_database(Database::in_memory()?, DEFAULT_CHANGE_BUFFER)
    }

    fn with_database(mut db: Database, change_buffer: usize) -> StoreResult<Self> {
        init_schema(&db)?;

        let (conn, cursor) = db.feed_parts();
        cursor.seq = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM change_log", [], |row| {
            row.get(0)
        })?;
        cursor.data_version = data_version(conn)?;

        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Ok(Self {
            db: Mutex::new(db),
            changes,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish(&self, change: StoreChange) {
        // No live receivers is not an error.
        let _ = self.changes.send(change);
    }

    /// Total number of stored messages across all conversations
    pub fn message_count(&self) -> StoreResult<usize> {
        let db = self.lock()?;
        let count: i64 =
            db.connection()
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Publish changes that other connections committed since the last call.
    ///
    /// Returns how many distinct changes were published. Cheap when nothing
    /// happened: `PRAGMA data_version` only moves on a foreign commit.
    pub fn poll_external_changes(&self) -> StoreResult<usize> {
        let entries = {
            let mut db = self.lock()?;
            let (conn, cursor) = db.feed_parts();

            let version = data_version(conn)?;
            if version == cursor.data_version {
                return Ok(0);
            }
            cursor.data_version = version;

            let mut stmt = conn.prepare(
                "SELECT seq, kind, subject FROM change_log WHERE seq > ?1 ORDER BY seq ASC",
            )?;
            let entries = stmt
                .query_map(params![cursor.seq], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            if let Some((last, _, _)) = entries.last() {
                cursor.seq = *last;
            }
            entries
        };

        let mut found: Vec<StoreChange> = Vec::new();
        for (seq, kind, subject) in entries {
            let change = match kind.as_str() {
                KIND_MESSAGES => match parse_key("change_log", &subject) {
                    Ok(key) => StoreChange::Messages(key),
                    Err(err) => {
                        log::warn!("Skipping change log entry {seq}: {err}");
                        continue;
                    }
                },
                KIND_DIRECTORY => StoreChange::Directory(subject),
                other => {
                    log::warn!("Skipping change log entry {seq} of unknown kind {other:?}");
                    continue;
                }
            };
            if !found.contains(&change) {
                found.push(change);
            }
        }

        for change in &found {
            self.publish(change.clone());
        }
        Ok(found.len())
    }
}

/// Poll `store` for commits made by other connections every `every`, until
/// the last strong reference to the store is dropped.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_change_watcher(store: &Arc<SqliteStore>, every: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(store);
    let every = every.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(store) = weak.upgrade() else {
                log::debug!("Change watcher stopping: store closed");
                return;
            };
            match tokio::task::spawn_blocking(move || store.poll_external_changes()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(count)) => log::debug!("Picked up {count} external store changes"),
                Ok(Err(err)) => log::warn!("Failed to read the change log: {err}"),
                Err(err) => log::warn!("Change watcher worker failed: {err}"),
            }
        }
    })
}

fn data_version(conn: &rusqlite::Connection) -> SqlResult<i64> {
    conn.query_row("PRAGMA data_version", [], |row| row.get(0))
}

/// Record a change inside the writing transaction and return its sequence.
fn log_change(tx: &Transaction<'_>, kind: &str, subject: &str, at: i64) -> SqlResult<i64> {
    tx.execute(
        "INSERT INTO change_log (kind, subject, logged_at) VALUES (?1, ?2, ?3)",
        params![kind, subject, at],
    )?;
    Ok(tx.last_insert_rowid())
}

fn init_schema(db: &Database) -> SqlResult<()> {
    let conn = db.connection();
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            conversation_key TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversation_directory (
            participant TEXT NOT NULL,
            conversation_key TEXT NOT NULL,
            other_participant TEXT NOT NULL,
            last_message TEXT NOT NULL,
            last_sender TEXT NOT NULL,
            last_message_at INTEGER NOT NULL,
            PRIMARY KEY (participant, conversation_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS change_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            logged_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation
         ON messages(conversation_key, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_directory_participant
         ON conversation_directory(participant, last_message_at)",
        [],
    )?;

    Ok(())
}

fn parse_key(table: &'static str, raw: &str) -> StoreResult<ConversationKey> {
    ConversationKey::parse(raw).map_err(|err| StoreError::Corrupt {
        table,
        details: err.to_string(),
    })
}

impl ConversationStore for SqliteStore {
    fn append_message(&self, key: &ConversationKey, input: NewMessage) -> StoreResult<ChatMessage> {
        let message = {
            let mut db = self.lock()?;
            let (message, seq) = db.write(|tx, clock| {
                // Other processes write this file too; stay ahead of their rows.
                let persisted: Option<i64> =
                    tx.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
                clock.observe(persisted.unwrap_or(0));

                let message = ChatMessage {
                    id: MessageId::new_v4(),
                    conversation_key: key.clone(),
                    sender: input.sender,
                    recipient: input.recipient,
                    body: input.body,
                    created_at: clock.next(),
                };
                tx.execute(
                    "INSERT INTO messages (id, conversation_key, sender, recipient, body, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        message.id.0.to_string(),
                        key.as_str(),
                        message.sender,
                        message.recipient,
                        message.body,
                        message.created_at
                    ],
                )?;

                let seq = log_change(tx, KIND_MESSAGES, key.as_str(), message.created_at)?;
                tx.execute(
                    "DELETE FROM change_log WHERE logged_at < ?1",
                    params![message.created_at - CHANGE_LOG_RETENTION_MICROS],
                )?;
                Ok((message, seq))
            })?;
            db.feed_mut().note_own_change(seq);
            message
        };

        log::debug!("Stored message {} in {}", message.id, key);
        self.publish(StoreChange::Messages(key.clone()));
        Ok(message)
    }

    fn list_messages(
        &self,
        key: &ConversationKey,
        query: MessageQuery,
    ) -> StoreResult<Vec<ChatMessage>> {
        let before = query.before.unwrap_or(i64::MAX);
        // SQLite treats a negative LIMIT as unbounded.
        let limit = query.limit.map(|limit| limit as i64).unwrap_or(-1);

        let db = self.lock()?;
        let mut stmt = db.connection().prepare(
            "SELECT id, sender, recipient, body, created_at FROM (
                SELECT seq, id, sender, recipient, body, created_at
                FROM messages
                WHERE conversation_key = ?1 AND created_at < ?2
                ORDER BY created_at DESC, seq DESC
                LIMIT ?3
             )
             ORDER BY created_at ASC, seq ASC",
        )?;

        let rows = stmt
            .query_map(params![key.as_str(), before, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, sender, recipient, body, created_at)| {
                let id = Uuid::parse_str(&id).map_err(|err| StoreError::Corrupt {
                    table: "messages",
                    details: format!("message id {id:?}: {err}"),
                })?;
                Ok(ChatMessage {
                    id: MessageId(id),
                    conversation_key: key.clone(),
                    sender,
                    recipient,
                    body,
                    created_at,
                })
            })
            .collect()
    }

    fn upsert_directory_record(&self, record: &DirectoryRecord) -> StoreResult<()> {
        {
            let mut db = self.lock()?;
            let seq = db.write(|tx, _| {
                tx.execute(
                    "INSERT INTO conversation_directory
                        (participant, conversation_key, other_participant, last_message, last_sender, last_message_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(participant, conversation_key) DO UPDATE SET
                        other_participant = excluded.other_participant,
                        last_message = excluded.last_message,
                        last_sender = excluded.last_sender,
                        last_message_at = excluded.last_message_at
                     WHERE excluded.last_message_at >= conversation_directory.last_message_at",
                    params![
                        record.participant,
                        record.conversation_key.as_str(),
                        record.other_participant,
                        record.last_message,
                        record.last_sender,
                        record.last_message_at
                    ],
                )?;
                log_change(
                    tx,
                    KIND_DIRECTORY,
                    &record.participant,
                    Utc::now().timestamp_micros(),
                )
            })?;
            db.feed_mut().note_own_change(seq);
        }

        self.publish(StoreChange::Directory(record.participant.clone()));
        Ok(())
    }

    fn list_directory(&self, participant: &str) -> StoreResult<Vec<DirectoryRecord>> {
        let db = self.lock()?;
        let mut stmt = db.connection().prepare(
            "SELECT conversation_key, other_participant, last_message, last_sender, last_message_at
             FROM conversation_directory
             WHERE participant = ?1
             ORDER BY last_message_at DESC, conversation_key ASC",
        )?;

        let rows = stmt
            .query_map(params![participant], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(key, other_participant, last_message, last_sender, last_message_at)| {
                    Ok(DirectoryRecord {
                        participant: participant.to_string(),
                        conversation_key: parse_key("conversation_directory", &key)?,
                        other_participant,
                        last_message,
                        last_sender,
                        last_message_at,
                    })
                },
            )
            .collect()
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
