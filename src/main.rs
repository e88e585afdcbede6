use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use parcelpro_chat::config::{self, AppConfig};
use parcelpro_chat::console::{ChatSession, RetryPolicy};
use parcelpro_chat::storage::ensure_parent_dir;
use parcelpro_chat::{
    ChatMessage, ConversationDirectory, ConversationKey, ConversationStore, MessageChannel,
    SqliteStore, resolve, spawn_change_watcher,
};

#[derive(Parser)]
#[command(
    name = "parcelpro-chat",
    version,
    about = "Admin-to-user chat for the ParcelPro dashboard"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the conversation key of two participants
    Key { a: String, b: String },
    /// Send one message
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Extra attempts with exponential backoff if the store is unavailable
        #[arg(long, default_value_t = 0)]
        retries: u32,
        body: String,
    },
    /// Print the messages of a conversation
    History {
        a: String,
        b: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only messages older than this store timestamp (microseconds)
        #[arg(long)]
        before: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// List a participant's conversations, newest first
    Inbox {
        participant: String,
        #[arg(long)]
        json: bool,
    },
    /// Follow a conversation live until Ctrl-C
    Watch { a: String, b: String },
    /// Interactive chat as one participant
    Chat {
        #[arg(long = "as")]
        me: String,
        #[arg(long = "with")]
        peer: String,
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Write the default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config).apply_env_overrides();

    match cli.command {
        Command::InitConfig => {
            config::save_config(&cli.config, &AppConfig::default())?;
            println!("Wrote {}", cli.config);
            Ok(())
        }
        Command::Key { a, b } => {
            println!("{}", resolve(&a, &b)?);
            Ok(())
        }
        command => {
            let store = open_store(&app_config)?;
            run_command(command, store, &app_config).await
        }
    }
}

fn open_store(app_config: &AppConfig) -> Result<Arc<dyn ConversationStore>, Box<dyn Error>> {
    ensure_parent_dir(&app_config.database_path)?;
    let store = Arc::new(SqliteStore::open(
        &app_config.database_path,
        app_config.change_buffer,
    )?);
    log::info!("Opened message store at {}", app_config.database_path);
    // Other processes share the file; their sends must reach our listeners.
    spawn_change_watcher(&store, app_config.poll_interval());
    Ok(store)
}

async fn run_command(
    command: Command,
    store: Arc<dyn ConversationStore>,
    app_config: &AppConfig,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Send {
            from,
            to,
            retries,
            body,
        } => {
            let key = resolve(&from, &to)?;
            let channel = MessageChannel::new(store);
            let policy = RetryPolicy::exponential(retries, Duration::from_millis(250));
            let id = policy.send(&channel, &key, &from, &to, &body).await?;
            println!("{id}");
        }
        Command::History {
            a,
            b,
            limit,
            before,
            json,
        } => {
            let key = resolve(&a, &b)?;
            let messages = MessageChannel::new(store).history(&key, before, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                messages.iter().for_each(print_message);
            }
        }
        Command::Inbox { participant, json } => {
            let summaries = ConversationDirectory::new(store)
                .snapshot(&participant)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for summary in summaries {
                    println!(
                        "{}  {}  {}: {}",
                        summary.key,
                        summary.other_participant,
                        summary.last_sender,
                        summary.last_message
                    );
                }
            }
        }
        Command::Watch { a, b } => {
            let key = resolve(&a, &b)?;
            watch(store, key, app_config.snapshot_limit).await?;
        }
        Command::Chat { me, peer, retries } => {
            let session = ChatSession::new(store, &me, &peer, app_config.snapshot_limit)?
                .with_retry(RetryPolicy::exponential(retries, Duration::from_millis(250)));
            session.run().await?;
        }
        Command::Key { .. } | Command::InitConfig => {}
    }
    Ok(())
}

async fn watch(
    store: Arc<dyn ConversationStore>,
    key: ConversationKey,
    snapshot_limit: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let channel = MessageChannel::new(store).with_snapshot_limit(snapshot_limit);
    let (error_tx, mut error_rx) = tokio::sync::mpsc::channel(1);

    let subscription = channel.subscribe(
        &key,
        |messages| {
            println!("--- {} messages", messages.len());
            messages.iter().for_each(print_message);
        },
        move |err| {
            let _ = error_tx.try_send(err);
        },
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            subscription.cancel();
            Ok(())
        }
        Some(err) = error_rx.recv() => {
            Err(format!("disconnected — retry ({err})").into())
        }
    }
}

fn print_message(message: &ChatMessage) {
    let time = message
        .sent_at()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!(
        "[{time}] {} -> {}: {}",
        message.sender, message.recipient, message.body
    );
}
