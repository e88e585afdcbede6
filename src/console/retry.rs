use std::time::Duration;

use crate::common::MessageId;
use crate::error::{ChatError, ChatResult};
use crate::messaging::{ConversationKey, MessageChannel};

/// Caller-side resend policy with exponential backoff.
///
/// Only `StoreUnavailable` is retried. A write that landed but reported a
/// failure will be stored twice, which is why the default is a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// One initial attempt plus `retries` backoff retries.
    pub fn exponential(retries: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn send(
        &self,
        channel: &MessageChannel,
        key: &ConversationKey,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> ChatResult<MessageId> {
        let mut attempt = 1;
        loop {
            match channel.send(key, sender, recipient, body).await {
                Err(ChatError::StoreUnavailable(err)) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "Send attempt {attempt}/{} failed ({err}); retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
