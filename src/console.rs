//! Line-oriented console front end for the chat client.
//!
//! Reads commands from stdin and prints client events to stdout. Logs go to
//! stderr so they do not interleave with the conversation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::chat::{
    ChatApi, ChatClient, ChatConfig, ChatEvent, ConnectionState, ConversationId, FileTokenStore,
    HttpChatApi, Message, MessageStatus, NoticeLevel, Session, StatusIndicator, TokenStore, UserId,
    WsTransport,
};

/// Environment variable carrying a bearer token to use (and persist).
const TOKEN_ENV: &str = "DOCEASE_TOKEN";

const HELP: &str =
    "commands: /list, /open <conversation-id>, /close, /file <path>, /status, /logout, /quit";

/// Run the console client.
///
/// # Returns
/// `ExitCode::SUCCESS` on a clean exit, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting DocEase chat v{}", env!("CARGO_PKG_VERSION"));

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(console(config)) {
        error!("Chat console error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// A parsed input line.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    List,
    Open(ConversationId),
    Close,
    File(PathBuf),
    Status,
    Logout,
    Quit,
    Help,
    Text(String),
    Empty,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Text(line.to_string());
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));
        match (name, arg) {
            ("list", _) => Self::List,
            ("open", id) if !id.is_empty() => Self::Open(ConversationId::new(id)),
            ("close", _) => Self::Close,
            ("file", path) if !path.is_empty() => Self::File(PathBuf::from(path)),
            ("status", _) => Self::Status,
            ("logout", _) => Self::Logout,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Help,
        }
    }
}

async fn console(config: ChatConfig) -> anyhow::Result<()> {
    let store = Arc::new(FileTokenStore::new(config.token_file.clone()));
    let token = match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => token.trim().to_string(),
        _ => store.load().await?.with_context(|| {
            format!(
                "no token found in {} and {TOKEN_ENV} is not set",
                config.token_file.display()
            )
        })?,
    };

    let api = Arc::new(HttpChatApi::new(config.clone(), &token)?);
    let user = api
        .current_user()
        .await
        .context("failed to resolve the current user")?;
    let session = Session::establish(user, token, store).await?;
    let me = session.user_id().clone();

    let client = ChatClient::new(api, session, Arc::new(WsTransport), config)?;
    let mut events = client.subscribe();
    client.start().await?;

    let mut out = tokio::io::stdout();
    write_line(&mut out, HELP).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !execute(&client, &me, Command::parse(&line), &mut out).await? {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = render_event(&event, &me, |m| client.status_of(m)) {
                        write_line(&mut out, &text).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Console fell behind on events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Run one command. Returns `false` when the console should exit.
async fn execute(
    client: &ChatClient,
    me: &UserId,
    command: Command,
    out: &mut Stdout,
) -> anyhow::Result<bool> {
    let result = match command {
        Command::Empty => Ok(()),
        Command::Help => {
            write_line(out, HELP).await?;
            Ok(())
        }
        Command::List => {
            for conversation in client.conversations().await {
                let last = conversation
                    .last_message
                    .as_ref()
                    .map(Message::preview)
                    .unwrap_or_default();
                let role = conversation
                    .other_participant_role
                    .map_or("", |r| r.as_str());
                let line = format!(
                    "{}  {} ({role})  unread: {}  {last}",
                    conversation.id,
                    conversation.title(),
                    conversation.unread_count
                );
                write_line(out, &line).await?;
            }
            if let Some(badge) = client.unread_badge().await {
                write_line(out, &format!("total unread: {badge}")).await?;
            }
            Ok(())
        }
        Command::Open(id) => match client.open_conversation_by_id(&id).await {
            Ok(()) => {
                for message in client.messages().await {
                    write_line(out, &render_message(&message, message.status, me)).await?;
                }
                Ok(())
            }
            Err(err) => Err(err),
        },
        Command::Close => {
            client.close_conversation().await;
            Ok(())
        }
        Command::Status => {
            write_line(out, &render_state(&client.connection_state())).await?;
            Ok(())
        }
        Command::File(path) => client.send_file_path(&path).await.map(drop),
        Command::Text(body) => client.send_text(&body).await.map(drop),
        Command::Logout => {
            client.logout().await?;
            write_line(out, "logged out").await?;
            return Ok(false);
        }
        Command::Quit => return Ok(false),
    };

    if let Err(err) = result {
        // Network failures already surfaced as notices.
        if err.is_local_rejection() {
            write_line(out, &format!("! {err}")).await?;
        }
    }
    Ok(true)
}

fn render_message(message: &Message, status: MessageStatus, me: &UserId) -> String {
    let time = message.created_at.format("%H:%M");
    if message.is_from(me) {
        let indicator = StatusIndicator::for_status(status);
        format!("[{time}] me: {} {}", message.preview(), indicator.glyph())
    } else {
        let name = message.sender_name.as_deref().unwrap_or("them");
        format!("[{time}] {name}: {}", message.preview())
    }
}

fn render_state(state: &ConnectionState) -> String {
    let online = if state.online { "online" } else { "offline" };
    match &state.last_error {
        Some(err) => format!("* {online} (last error: {err})"),
        None => format!("* {online}"),
    }
}

/// Render an event, resolving message status through `status`.
fn render_event(
    event: &ChatEvent,
    me: &UserId,
    status: impl Fn(&Message) -> MessageStatus,
) -> Option<String> {
    match event {
        ChatEvent::Notice { level, message } => Some(match level {
            NoticeLevel::Success => format!("[ok] {message}"),
            NoticeLevel::Error => format!("[error] {message}"),
        }),
        ChatEvent::ConnectionChanged { online } => {
            Some(if *online { "* online" } else { "* offline" }.to_string())
        }
        ChatEvent::Typing { is_typing: true } => Some("* typing...".to_string()),
        ChatEvent::MessageAppended { message } => {
            Some(render_message(message, status(message), me))
        }
        ChatEvent::Typing { is_typing: false }
        | ChatEvent::StreamReset { .. }
        | ChatEvent::StreamLoaded { .. }
        | ChatEvent::ScrollToEnd { .. }
        | ChatEvent::ConversationsUpdated { .. } => None,
    }
}

async fn write_line(out: &mut Stdout, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
