use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use quintet_client::{start_session, ClientConfig, ConnectionState, Outbox, SessionEvent, SessionManager};
use quintet_shared::protocol::ChatMessage;
use quintet_shared::types::{ContentKind, RoomId};
use quintet_store::Database;

#[derive(Parser, Debug)]
#[command(name = "quintet", version, about = "Serverless group chat for rooms of up to five")]
struct Cli {
    /// Room to join
    #[arg(long)]
    room: String,

    /// Display name shown to the other participants
    #[arg(long)]
    name: String,

    /// Relay WebSocket URL (overrides RELAY_URL)
    #[arg(long)]
    relay: Option<String>,

    /// Message database path (overrides QUINTET_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Host other participants use to reach us (overrides LINK_ADVERTISE_HOST)
    #[arg(long)]
    advertise: Option<String>,
}

const HELP: &str = "\
commands:
  /image <path>        send an image file
  /reply <id> <text>   reply to a stored message
  /away, /back         change status
  /peers               list participants
  /history             show this room's messages
  /join <room>         switch rooms
  /quit                leave";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quintet_client=info,quintet_net=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    if let Some(host) = cli.advertise {
        config.link_advertise_host = host;
    }

    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    tracing::info!(relay = %config.relay_url, room = %cli.room, "Starting quintet");

    let (manager, mut events) =
        start_session(&config, &cli.name, RoomId::new(cli.room), Outbox::new(db))
            .await
            .context("failed to join room")?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match handle_line(&manager, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("! {e:#}"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                render_event(&manager, &event);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.leave().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(manager: &SessionManager, line: &str) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    let Some(command) = line.strip_prefix('/') else {
        let message = manager.send_message(line, ContentKind::Text, None)?;
        render_own(&message);
        return Ok(true);
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "quit" => return Ok(false),
        "away" => manager.set_focus(false),
        "back" => manager.set_focus(true),
        "image" => {
            let content = image_data_url(Path::new(rest)).await?;
            let message = manager.send_message(content, ContentKind::Image, None)?;
            render_own(&message);
        }
        "reply" => {
            let (id, text) = rest.split_once(' ').context("usage: /reply <id> <text>")?;
            let message = manager.send_message(text.trim(), ContentKind::Text, Some(id))?;
            render_own(&message);
        }
        "peers" => {
            let roster = manager.roster();
            if roster.is_empty() {
                println!("  nobody else here");
            }
            for session in roster.values() {
                println!(
                    "  {} [{}] {}{}",
                    session.label(),
                    session.state.as_str(),
                    session.activity.as_str(),
                    if session.typing { " (typing)" } else { "" }
                );
            }
        }
        "history" => {
            for message in manager.history()? {
                let marker = if message.pending { " (pending)" } else { "" };
                println!(
                    "  {} {}: {}{}",
                    message.id,
                    message.sender,
                    summarize(message.kind, &message.content),
                    marker
                );
            }
        }
        "join" if !rest.is_empty() => {
            manager.switch_room(RoomId::new(rest)).await?;
        }
        _ => println!("{HELP}"),
    }
    Ok(true)
}

async fn image_data_url(path: &Path) -> anyhow::Result<String> {
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => anyhow::bail!("unsupported image type: {}", path.display()),
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

fn summarize(kind: ContentKind, content: &str) -> String {
    match kind {
        ContentKind::Text => content.to_string(),
        ContentKind::Image => format!("[image, {} bytes]", content.len()),
    }
}

fn render_own(message: &ChatMessage) {
    println!("> {}", summarize(message.kind, &message.content));
}

fn render_event(manager: &SessionManager, event: &SessionEvent) {
    let label = |peer: &quintet_shared::PeerId| {
        manager
            .roster()
            .get(peer)
            .map(|s| s.label())
            .unwrap_or_else(|| peer.short().to_string())
    };

    match event {
        SessionEvent::RoomJoined { room, peers } => println!("* joined {room} ({peers} already here)"),
        SessionEvent::RoomFull { room } => println!("* {room} is full"),
        SessionEvent::Identified { name, .. } => println!("* {name} connected"),
        SessionEvent::PeerLeft { peer } => println!("* {} left", peer.short()),
        SessionEvent::StateChanged { peer, state } => match state {
            ConnectionState::Abandoned => println!("* {} is unreachable", label(peer)),
            ConnectionState::Disconnected => println!("* lost connection to {}", label(peer)),
            _ => {}
        },
        SessionEvent::MessageReceived { message, .. } => {
            let time = chrono::DateTime::from_timestamp_millis(message.timestamp)
                .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
                .unwrap_or_default();
            if let Some(quote) = &message.reply_to {
                println!("  | {}: {}", quote.sender, summarize(quote.kind, &quote.content));
            }
            println!(
                "[{time}] {} ({}): {}",
                message.sender,
                message.id,
                summarize(message.kind, &message.content)
            );
        }
        SessionEvent::Typing { peer, typing: true } => println!("* {} is typing", label(peer)),
        SessionEvent::StatusChanged { peer, activity } => {
            println!("* {} is {}", label(peer), activity.as_str())
        }
        SessionEvent::RelayLost => println!("* relay connection lost"),
        _ => {}
    }
}
