use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, Result as SqlResult, Transaction, TransactionBehavior};

/// Microsecond clock shared by every connection to one database file.
#[derive(Debug, Default)]
pub struct StoreClock {
    last: i64,
}

impl StoreClock {
    /// Never hand out anything at or below `persisted`.
    pub fn observe(&mut self, persisted: i64) {
        self.last = self.last.max(persisted);
    }

    /// Strictly increasing, even if the wall clock stalls or steps backwards.
    pub fn next(&mut self) -> i64 {
        let now = Utc::now().timestamp_micros();
        self.last = now.max(self.last + 1);
        self.last
    }
}

/// How far this connection has read the shared change log.
#[derive(Debug, Default)]
pub struct FeedCursor {
    pub seq: i64,
    /// Last `PRAGMA data_version`; it only moves when another connection commits.
    pub data_version: i64,
}

impl FeedCursor {
    /// Advance past a change this connection wrote itself, unless another
    /// connection's entry is still unread below it.
    pub fn note_own_change(&mut self, seq: i64) {
        if seq == self.seq + 1 {
            self.seq = seq;
        }
    }
}

/// Base database connection wrapper
pub struct Database {
    conn: Connection,
    clock: StoreClock,
    feed: FeedCursor,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_millis(5_000))?;
        Ok(Self::wrap(conn))
    }

    pub fn in_memory() -> SqlResult<Self> {
        Ok(Self::wrap(Connection::open_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn,
            clock: StoreClock::default(),
            feed: FeedCursor::default(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn feed_mut(&mut self) -> &mut FeedCursor {
        &mut self.feed
    }

    /// Connection and cursor together, for reading the change log.
    pub fn feed_parts(&mut self) -> (&Connection, &mut FeedCursor) {
        (&self.conn, &mut self.feed)
    }

    /// Run `op` in an IMMEDIATE transaction, which holds the file's write
    /// lock from the start so reads inside it see every other writer's
    /// committed rows.
    pub fn write<T, F>(&mut self, op: F) -> SqlResult<T>
    where
        F: FnOnce(&Transaction<'_>, &mut StoreClock) -> SqlResult<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = op(&tx, &mut self.clock)?;
        tx.commit()?;
        Ok(out)
    }
}
