use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::error::{ChatError, StoreError, StoreResult};
use crate::storage::{ConversationStore, StoreChange, run_blocking};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    /// Terminal; set by [`Subscription::cancel`].
    Cancelled,
    /// Terminal; the store listener failed and `on_error` was called.
    Errored,
}

/// Handle to a live snapshot listener.
///
/// Dropping the handle cancels the listener. Callbacks are invoked while the
/// state lock is held, which is what makes "no callback after `cancel`
/// returns" hold; a callback must therefore never cancel its own
/// subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    state: Arc<Mutex<SubscriptionState>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        *lock_state(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Release the store listener. Safe to call any number of times.
    pub fn cancel(&self) {
        {
            let mut state = lock_state(&self.state);
            if *state == SubscriptionState::Active {
                *state = SubscriptionState::Cancelled;
            }
        }
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock_state(state: &Mutex<SubscriptionState>) -> MutexGuard<'_, SubscriptionState> {
    // A panicking callback must not wedge cancel().
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `query` now and again after every store change accepted by `relevant`,
/// handing each full result to `on_update`.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_snapshot_listener<T, Q, M, U, E>(
    store: Arc<dyn ConversationStore>,
    label: String,
    query: Q,
    relevant: M,
    mut on_update: U,
    on_error: E,
) -> Subscription
where
    T: Send + 'static,
    Q: Fn(&dyn ConversationStore) -> StoreResult<T> + Send + Sync + 'static,
    M: Fn(&StoreChange) -> bool + Send + 'static,
    U: FnMut(T) + Send + 'static,
    E: FnOnce(ChatError) + Send + 'static,
{
    let state = Arc::new(Mutex::new(SubscriptionState::Active));
    // Registered before the first query so no write can slip between them.
    let mut changes = store.changes();
    let query = Arc::new(query);

    let task_state = Arc::clone(&state);
    let task = tokio::spawn(async move {
        loop {
            let run_query = Arc::clone(&query);
            let snapshot = run_blocking(&store, move |store| run_query(store)).await;

            match snapshot {
                Ok(snapshot) => {
                    let state = lock_state(&task_state);
                    if *state != SubscriptionState::Active {
                        return;
                    }
                    on_update(snapshot);
                }
                Err(err) => {
                    fail(&task_state, &label, err, on_error);
                    return;
                }
            }

            loop {
                match changes.recv().await {
                    Ok(change) if relevant(&change) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        // The next snapshot covers whatever was missed.
                        log::debug!("{label} listener lagged by {skipped} changes");
                        break;
                    }
                    Err(RecvError::Closed) => {
                        fail(&task_state, &label, StoreError::FeedClosed, on_error);
                        return;
                    }
                }
            }

            // Coalesce a burst of writes into a single re-query.
            while changes.try_recv().is_ok() {}
        }
    });

    Subscription { state, task }
}

fn fail<E>(state: &Mutex<SubscriptionState>, label: &str, err: StoreError, on_error: E)
where
    E: FnOnce(ChatError),
{
    let mut state = lock_state(state);
    if *state != SubscriptionState::Active {
        return;
    }
    log::warn!("{label} subscription failed: {err}");
    *state = SubscriptionState::Errored;
    on_error(ChatError::SubscriptionError(err));
}
