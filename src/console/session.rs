use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::retry::RetryPolicy;
use super::state::ConsoleState;
use crate::common::{ChatEvent, ChatMessage, ConsoleCommand};
use crate::error::{ChatError, ChatResult};
use crate::messaging::{ConversationDirectory, MessageChannel, Subscription, resolve};
use crate::storage::ConversationStore;

const HISTORY_PAGE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Interactive admin console for one conversation.
pub struct ChatSession {
    state: ConsoleState,
    channel: MessageChannel,
    directory: ConversationDirectory,
    retry: RetryPolicy,
    event_sender: mpsc::UnboundedSender<ChatEvent>,
    event_receiver: mpsc::UnboundedReceiver<ChatEvent>,
    conversation: Option<Subscription>,
    inbox: Option<Subscription>,
    last_printed_at: i64,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        me: &str,
        peer: &str,
        snapshot_limit: Option<usize>,
    ) -> ChatResult<Self> {
        let key = resolve(me, peer)?;
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        Ok(Self {
            state: ConsoleState::new(me.to_string(), peer.to_string(), key),
            channel: MessageChannel::new(Arc::clone(&store)).with_snapshot_limit(snapshot_limit),
            directory: ConversationDirectory::new(store),
            retry: RetryPolicy::none(),
            event_sender,
            event_receiver,
            conversation: None,
            inbox: None,
            last_printed_at: i64::MIN,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> &ConsoleState {
        &self.state
    }

    /// (Re)start both live listeners. Old handles are cancelled first.
    pub fn connect(&mut self) -> ChatResult<()> {
        if let Some(old) = self.conversation.take() {
            old.cancel();
        }
        if let Some(old) = self.inbox.take() {
            old.cancel();
        }

        let updates = self.event_sender.clone();
        let errors = self.event_sender.clone();
        self.conversation = Some(self.channel.subscribe(
            &self.state.key,
            move |messages| {
                let _ = updates.send(ChatEvent::MessagesUpdated(messages));
            },
            move |err| {
                let _ = errors.send(ChatEvent::MessagesDisconnected(err.to_string()));
            },
        ));

        let updates = self.event_sender.clone();
        let errors = self.event_sender.clone();
        self.inbox = Some(self.directory.list_for_participant(
            &self.state.me,
            move |inbox| {
                let _ = updates.send(ChatEvent::InboxUpdated(inbox));
            },
            move |err| {
                let _ = errors.send(ChatEvent::InboxDisconnected(err.to_string()));
            },
        )?);

        Ok(())
    }

    pub fn disconnect(&mut self) {
        for subscription in [self.conversation.take(), self.inbox.take()].into_iter().flatten() {
            subscription.cancel();
        }
    }

    /// Wait for the next pushed event and fold it into the state.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        let event = self.event_receiver.recv().await?;
        self.state.apply_event(event.clone());
        Some(event)
    }

    pub async fn run(mut self) -> std::io::Result<()> {
        if let Err(err) = self.connect() {
            println!("! {err}");
            return Ok(());
        }
        println!("{}", self.state.status_line());
        println!("Type a message, or /older /inbox /retry /reconnect /quit");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if self.handle_command(ConsoleCommand::parse(&line)).await == Flow::Quit {
                        break;
                    }
                }
                Some(event) = self.event_receiver.recv() => {
                    self.state.apply_event(event.clone());
                    self.render_event(&event);
                }
            }
        }

        self.disconnect();
        Ok(())
    }

    pub async fn handle_command(&mut self, command: ConsoleCommand) -> Flow {
        match command {
            ConsoleCommand::Send(text) => {
                self.state.stage_input(text);
                self.send_pending().await;
            }
            ConsoleCommand::Retry => {
                if self.state.has_pending_input() {
                    self.send_pending().await;
                } else {
                    println!("! nothing to resend");
                }
            }
            ConsoleCommand::Reconnect => match self.connect() {
                Ok(()) => println!("~ reconnecting"),
                Err(err) => println!("! {err}"),
            },
            ConsoleCommand::Inbox => self.print_inbox(),
            ConsoleCommand::Older => self.load_older().await,
            ConsoleCommand::Quit => return Flow::Quit,
            ConsoleCommand::Unknown(command) => println!("! unknown command {command}"),
        }
        Flow::Continue
    }

    async fn send_pending(&mut self) {
        let body = self.state.input_text.clone();
        let result = self
            .retry
            .send(
                &self.channel,
                &self.state.key,
                &self.state.me,
                &self.state.peer,
                &body,
            )
            .await;

        match result {
            Ok(_) => self.state.mark_sent(),
            Err(ChatError::EmptyMessage) => self.state.mark_sent(),
            Err(err) if err.is_store_failure() => {
                println!("! send failed ({err}); message kept, type /retry to resend");
            }
            Err(err) => println!("! {err}"),
        }
    }

    async fn load_older(&mut self) {
        let before = self.state.oldest_timestamp();
        match self
            .channel
            .history(&self.state.key, before, HISTORY_PAGE)
            .await
        {
            Ok(page) if page.is_empty() => println!("~ no older messages"),
            Ok(page) => {
                for message in &page {
                    self.print_message(message);
                }
                self.state.prepend_history(page);
            }
            Err(err) => println!("! could not load history: {err}"),
        }
    }

    fn render_event(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::MessagesUpdated(messages) => {
                let fresh: Vec<&ChatMessage> = messages
                    .iter()
                    .filter(|message| message.created_at > self.last_printed_at)
                    .collect();
                for message in fresh {
                    self.print_message(message);
                }
                if let Some(last) = messages.last() {
                    self.last_printed_at = self.last_printed_at.max(last.created_at);
                }
            }
            ChatEvent::InboxUpdated(_) => {}
            ChatEvent::MessagesDisconnected(_) => println!("! {}", self.state.status_line()),
            ChatEvent::InboxDisconnected(reason) => {
                println!("! inbox disconnected — retry with /reconnect ({reason})")
            }
        }
    }

    fn print_message(&self, message: &ChatMessage) {
        let time = message
            .sent_at()
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("[{time}] {}: {}", message.sender, message.body);
    }

    fn print_inbox(&self) {
        if !self.state.inbox_link.is_live() {
            println!("! inbox disconnected — retry with /reconnect");
        }
        if self.state.inbox.is_empty() {
            println!("~ no conversations yet");
        }
        for summary in &self.state.inbox {
            let time = summary
                .last_message_time()
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!(
                "{time}  {:<16} {}: {}",
                summary.other_participant, summary.last_sender, summary.last_message
            );
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
