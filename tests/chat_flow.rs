mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlakyStore, bodies, wait_for};
use parcelpro_chat::console::RetryPolicy;
use parcelpro_chat::{
    ChatError, ConversationDirectory, MessageChannel, SqliteStore, SubscriptionState, resolve,
};
use tokio::sync::{mpsc, oneshot};

fn sqlite() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

#[tokio::test]
async fn first_snapshot_contains_the_sent_message() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone());
    let key = resolve("u1", "u2").unwrap();

    channel.send(&key, "u2", "u1", "earlier").await.unwrap();
    channel.send(&key, "u1", "u2", "hello").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.subscribe(
        &key,
        move |messages| {
            let _ = tx.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );

    let snapshot = wait_for(&mut rx, |_| true).await;
    let hello = snapshot.last().unwrap();
    assert_eq!(hello.body, "hello");
    assert_eq!(hello.sender, "u1");
    assert_eq!(hello.recipient, "u2");
    assert!(hello.created_at > snapshot[0].created_at);

    subscription.cancel();
}

#[tokio::test]
async fn admin_and_customer_conversation() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone());
    let directory = ConversationDirectory::new(store.clone());

    let key = resolve("u42", "admin").unwrap();
    channel
        .send(&key, "u42", "admin", "Where is my order?")
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.subscribe(
        &key,
        move |messages| {
            let _ = tx.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );

    let first = wait_for(&mut rx, |_| true).await;
    assert_eq!(bodies(&first), ["Where is my order?"]);
    assert_eq!(first[0].sender, "u42");

    channel
        .send(&key, "admin", "u42", "It shipped today.")
        .await
        .unwrap();
    let second = wait_for(&mut rx, |messages| messages.len() == 2).await;
    assert_eq!(bodies(&second), ["Where is my order?", "It shipped today."]);

    let inbox = directory.snapshot("admin").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].key, key);
    assert_eq!(inbox[0].other_participant, "u42");
    assert_eq!(inbox[0].last_message, "It shipped today.");
    assert_eq!(inbox[0].last_sender, "admin");

    let customer_inbox = directory.snapshot("u42").await.unwrap();
    assert_eq!(customer_inbox[0].other_participant, "admin");

    subscription.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_are_seen_in_one_order() {
    let store = sqlite();
    let key = resolve("admin", "u7").unwrap();
    let admin_side = MessageChannel::new(store.clone());
    let customer_side = MessageChannel::new(store.clone());

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let sub_a = admin_side.subscribe(
        &key,
        move |messages| {
            let _ = tx_a.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );
    let sub_b = customer_side.subscribe(
        &key,
        move |messages| {
            let _ = tx_b.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );

    let (first, second) = futures::future::join(
        admin_side.send(&key, "admin", "u7", "from admin"),
        customer_side.send(&key, "u7", "admin", "from customer"),
    )
    .await;
    first.unwrap();
    second.unwrap();

    let seen_a = wait_for(&mut rx_a, |messages| messages.len() == 2).await;
    let seen_b = wait_for(&mut rx_b, |messages| messages.len() == 2).await;

    let ids_a: Vec<_> = seen_a.iter().map(|m| m.id).collect();
    let ids_b: Vec<_> = seen_b.iter().map(|m| m.id).collect();
    assert_eq!(ids_a, ids_b);
    assert!(seen_a[0].created_at < seen_a[1].created_at);

    sub_a.cancel();
    sub_b.cancel();
}

#[tokio::test]
async fn directory_appears_after_first_send_and_sorts_newest_first() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone());
    let directory = ConversationDirectory::new(store.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = directory
        .list_for_participant(
            "admin",
            move |summaries| {
                let _ = tx.send(summaries);
            },
            |err| panic!("unexpected directory error: {err}"),
        )
        .unwrap();

    let empty = wait_for(&mut rx, |_| true).await;
    assert!(empty.is_empty());

    let k1 = resolve("admin", "u1").unwrap();
    let k2 = resolve("admin", "u2").unwrap();
    channel.send(&k1, "u1", "admin", "first from u1").await.unwrap();
    channel.send(&k2, "u2", "admin", "hello from u2").await.unwrap();
    channel.send(&k1, "admin", "u1", "reply to u1").await.unwrap();

    let listed = wait_for(&mut rx, |summaries| {
        summaries.len() == 2 && summaries[0].last_message == "reply to u1"
    })
    .await;
    assert_eq!(listed[0].key, k1);
    assert_eq!(listed[1].key, k2);
    assert_eq!(listed[1].last_message, "hello from u2");
    assert!(listed[0].last_message_at > listed[1].last_message_at);

    subscription.cancel();
}

#[tokio::test]
async fn no_callback_after_cancel() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone());
    let key = resolve("admin", "u3").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.subscribe(
        &key,
        move |messages| {
            let _ = tx.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );
    wait_for(&mut rx, |_| true).await;

    subscription.cancel();
    subscription.cancel();
    assert_eq!(subscription.state(), SubscriptionState::Cancelled);
    while rx.try_recv().is_ok() {}

    channel.send(&key, "u3", "admin", "anyone there?").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn dropping_the_handle_cancels() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone());
    let key = resolve("admin", "u3").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let _subscription = channel.subscribe(
            &key,
            move |messages| {
                let _ = tx.send(messages);
            },
            |_| {},
        );
        wait_for(&mut rx, |_| true).await;
    }

    channel.send(&key, "u3", "admin", "after drop").await.unwrap();
    // The sender lived inside the aborted task, so the channel closes.
    let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("channel should close once the task is gone");
    assert!(next.is_none());
}

#[tokio::test]
async fn failed_send_is_reported_and_not_listed() {
    let store = Arc::new(FlakyStore::new());
    let channel = MessageChannel::new(store.clone());
    let directory = ConversationDirectory::new(store.clone());
    let key = resolve("admin", "u5").unwrap();

    store.fail_next_appends(1);
    let result = channel.send(&key, "admin", "u5", "are you home?").await;
    assert!(matches!(result, Err(ChatError::StoreUnavailable(_))));
    assert_eq!(store.message_count(), 0);
    assert!(directory.snapshot("admin").await.unwrap().is_empty());

    // Caller-driven resend goes through once the store is back.
    channel.send(&key, "admin", "u5", "are you home?").await.unwrap();
    assert_eq!(store.message_count(), 1);
}

#[tokio::test]
async fn directory_failure_leaves_a_stale_preview_only() {
    let store = Arc::new(FlakyStore::new());
    let channel = MessageChannel::new(store.clone());
    let directory = ConversationDirectory::new(store.clone());
    let key = resolve("admin", "u6").unwrap();

    channel.send(&key, "u6", "admin", "first").await.unwrap();
    store.set_directory_down(true);
    channel.send(&key, "u6", "admin", "second").await.unwrap();
    assert_eq!(store.message_count(), 2);

    let inbox = directory.snapshot("admin").await.unwrap();
    assert_eq!(inbox[0].last_message, "first");

    store.set_directory_down(false);
    channel.send(&key, "admin", "u6", "third").await.unwrap();
    let inbox = directory.snapshot("admin").await.unwrap();
    assert_eq!(inbox[0].last_message, "third");
}

#[tokio::test]
async fn listener_failure_is_terminal_until_resubscribed() {
    let store = Arc::new(FlakyStore::new());
    let channel = MessageChannel::new(store.clone());
    let key = resolve("admin", "u8").unwrap();
    channel.send(&key, "u8", "admin", "ping").await.unwrap();

    store.set_reads_down(true);
    let (err_tx, err_rx) = oneshot::channel();
    let broken = channel.subscribe(
        &key,
        |_| panic!("no snapshot expected while reads are down"),
        move |err| {
            let _ = err_tx.send(err);
        },
    );
    let err = tokio::time::timeout(Duration::from_secs(5), err_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, ChatError::SubscriptionError(_)));
    assert_eq!(broken.state(), SubscriptionState::Errored);
    broken.cancel();
    assert_eq!(broken.state(), SubscriptionState::Errored);

    store.set_reads_down(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let fresh = channel.subscribe(
        &key,
        move |messages| {
            let _ = tx.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );
    let snapshot = wait_for(&mut rx, |_| true).await;
    assert_eq!(bodies(&snapshot), ["ping"]);
    assert!(fresh.is_active());
}

#[tokio::test]
async fn snapshot_limit_keeps_the_newest_messages() {
    let store = sqlite();
    let channel = MessageChannel::new(store.clone()).with_snapshot_limit(Some(2));
    let key = resolve("admin", "u9").unwrap();
    for body in ["one", "two", "three"] {
        channel.send(&key, "u9", "admin", body).await.unwrap();
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.subscribe(
        &key,
        move |messages| {
            let _ = tx.send(messages);
        },
        |err| panic!("unexpected subscription error: {err}"),
    );
    let snapshot = wait_for(&mut rx, |_| true).await;
    assert_eq!(bodies(&snapshot), ["two", "three"]);
    subscription.cancel();
}

#[tokio::test]
async fn retry_policy_rides_out_a_short_outage() {
    let store = Arc::new(FlakyStore::new());
    let channel = MessageChannel::new(store.clone());
    let key = resolve("admin", "u10").unwrap();

    store.fail_next_appends(2);
    let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
    policy
        .send(&channel, &key, "admin", "u10", "driver is outside")
        .await
        .unwrap();
    assert_eq!(store.message_count(), 1);

    store.fail_next_appends(5);
    let result = RetryPolicy::exponential(1, Duration::from_millis(1))
        .send(&channel, &key, "admin", "u10", "second try")
        .await;
    assert!(matches!(result, Err(ChatError::StoreUnavailable(_))));
    assert_eq!(store.message_count(), 1);
}

#[tokio::test]
async fn retry_policy_never_retries_caller_mistakes() {
    let store = Arc::new(FlakyStore::new());
    let channel = MessageChannel::new(store.clone());
    let key = resolve("admin", "u11").unwrap();

    let result = RetryPolicy::exponential(5, Duration::from_secs(60))
        .send(&channel, &key, "admin", "u11", "   ")
        .await;
    assert!(matches!(result, Err(ChatError::EmptyMessage)));
}

#[tokio::test]
async fn directory_rejects_invalid_participant() {
    let directory = ConversationDirectory::new(sqlite());
    let result = directory.list_for_participant("a|b", |_| {}, |_| {});
    assert!(matches!(result, Err(ChatError::InvalidIdentifier(_))));
}
