#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::Result;
use chrono::TimeZone;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

mod utils;

use chatsync::{
    config, now_millis, store, ChatSession, ConversationPair, MemoryFeed, Message, SqliteMessageStore,
    SyncConfig, ViewChange,
};

/// Command line arguments for chatsync
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatsync: a local-first chat conversation over a live message feed.",
    long_about = "chatsync keeps one conversation in sync between a local SQLite store and a live feed.\n\n\
    The feed here is in-process, so the peer is simulated from the prompt:\n\
    <text>            send a message\n\
    /peer <text>      receive a message from the peer\n\
    /hide, /show      detach or re-attach the feed\n\
    /offline, /online toggle feed availability (sends stay pending while offline)\n\
    /quit             close the conversation"
)]
struct Args {
    /// Current user id
    #[arg(long, default_value = "me")]
    user: String,

    /// Peer user id
    #[arg(long, default_value = "peer")]
    peer: String,

    /// Message database path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file path
    #[arg(long, value_name = "PATH", default_value = "chatsync.log")]
    log_file: PathBuf,

    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

/// One line typed at the prompt
#[derive(Debug, PartialEq)]
enum Input {
    Send(String),
    FromPeer(String),
    Hide,
    Show,
    Offline,
    Online,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Option<Input> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let input = match line {
            "/hide" => Input::Hide,
            "/show" => Input::Show,
            "/offline" => Input::Offline,
            "/online" => Input::Online,
            "/quit" => Input::Quit,
            _ => match line.strip_prefix("/peer ") {
                Some(text) => Input::FromPeer(text.to_string()),
                None => Input::Send(line.to_string()),
            },
        };
        Some(input)
    }
}

/// Format a message for the terminal
fn render(message: &Message, pair: &ConversationPair) -> String {
    let time = chrono::Local
        .timestamp_millis_opt(message.timestamp)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let who = if message.sender_id == pair.current_user {
        "you"
    } else {
        message.sender_id.as_str()
    };
    let status = if message.is_pending() { " (pending)" } else { "" };
    format!("[{}] {}: {}{}", time, who, message.message_text, status)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::setup_logging(args.log_file.to_str(), args.log_level)?;
    info!("Logging to file: {}", args.log_file.display());

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone());
    }
    let sync_config = SyncConfig::load()?;

    if let Some(path) = args.db.clone().or_else(|| sync_config.database_path.clone()) {
        store::set_db_path_override(path);
    }
    let store = Arc::new(SqliteMessageStore::open(None)?);
    let feed = Arc::new(MemoryFeed::new().with_latency(Duration::from_millis(150)));
    let pair = ConversationPair::new(&args.user, &args.peer);

    let session = ChatSession::open(pair.clone(), store, feed.clone(), sync_config)?;
    for message in session.snapshot().await? {
        println!("{}", render(&message, &pair));
    }

    let mut changes = session.view_changes();
    let printer_pair = pair.clone();
    let printer = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            match change {
                Ok(ViewChange::Inserted { message, .. }) => {
                    println!("{}", render(&message, &printer_pair))
                }
                Ok(ViewChange::Updated { message, .. }) => {
                    if message.sender_id == printer_pair.current_user && !message.is_pending() {
                        println!("  sent: {}", message.message_text);
                    }
                }
                Ok(ViewChange::Reset { len }) => println!("-- {} messages --", len),
                Err(e) => warn!("View printer fell behind: {}", e),
            }
        }
    });

    if let Err(e) = session.on_became_visible().await {
        eprintln!("Message feed unavailable: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(input) = Input::parse(&line) else {
            continue;
        };

        let result = match input {
            Input::Quit => break,
            Input::Send(text) => session.send_message(&text).await.map(|_| ()),
            Input::FromPeer(text) => {
                let message = Message::outgoing(&pair.peer, &pair.current_user, &text, now_millis());
                feed.insert_payload(message.to_payload()).map(|_| ())
            }
            Input::Hide => session.on_became_hidden().await,
            Input::Show => session.on_became_visible().await,
            Input::Offline => {
                feed.set_offline(true);
                Ok(())
            }
            Input::Online => {
                feed.set_offline(false);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Command failed: {}", e);
            eprintln!("Error: {}", e);
        }
    }

    printer.abort();
    session.close().await?;
    info!("chatsync exiting");
    Ok(())
}
