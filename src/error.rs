use thiserror::Error;

/// Failures raised by the store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("store worker failed: {0}")]
    Worker(String),
    #[error("corrupt row in {table}: {details}")]
    Corrupt {
        table: &'static str,
        details: String,
    },
    #[error("store change feed closed")]
    FeedClosed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers of the messaging core.
///
/// The first three are caller mistakes detected before the store is touched.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid participants: {0}")]
    InvalidParticipants(String),
    #[error("invalid participant or conversation identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("message body is empty")]
    EmptyMessage,
    #[error("message store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("subscription failed: {0}")]
    SubscriptionError(#[source] StoreError),
}

impl ChatError {
    /// Whether the failure came from the store rather than from the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_) | ChatError::SubscriptionError(_)
        )
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
