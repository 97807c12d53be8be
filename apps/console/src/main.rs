use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::Result;
use clap::Parser;
use client_core::{
    load_settings, ClientEvent, ClientSettings, HttpPersistenceBridge, IgnoreReason,
    SendOutcome, SessionController, SessionPhase,
};
use shared::domain::{ConversationId, Message, Role};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Terminal chat client for a conversation backend")]
struct Args {
    /// Backend base URL; overrides promptica.toml and the environment.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Conversation to open on startup.
    #[arg(long)]
    conversation: Option<i64>,
    /// Delay between reveal steps; 0 prints replies at once.
    #[arg(long)]
    reveal_interval_ms: Option<u64>,
}

impl Args {
    fn apply(&self, settings: &mut ClientSettings) {
        if let Some(url) = &self.api_url {
            settings.api_base_url = url.clone();
        }
        if let Some(token) = &self.token {
            settings.auth_token = Some(token.clone());
        }
        if let Some(ms) = self.reveal_interval_ms {
            settings.reveal_interval_ms = ms;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Prompt(String),
    List,
    New,
    Open(ConversationId),
    Rename(ConversationId, String),
    Delete(ConversationId),
    Refresh,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Prompt(line.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, args)| (name, args.trim()));

    let parse_id = |raw: &str| {
        raw.parse::<i64>()
            .map(ConversationId)
            .map_err(|_| format!("'{raw}' is not a conversation id"))
    };

    match name {
        "list" | "ls" => Ok(Command::List),
        "new" => Ok(Command::New),
        "open" => parse_id(args).map(Command::Open),
        "rename" => {
            let (id, title) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /rename <id> <title>".to_string())?;
            Ok(Command::Rename(parse_id(id)?, title.trim().to_string()))
        }
        "delete" | "rm" => parse_id(args).map(Command::Delete),
        "refresh" => Ok(Command::Refresh),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

fn print_help() {
    println!("Type a message to send it. Commands:");
    println!("  /list                 show conversations");
    println!("  /new                  start an empty conversation");
    println!("  /open <id>            switch to a conversation");
    println!("  /rename <id> <title>  rename a conversation");
    println!("  /delete <id>          delete a conversation");
    println!("  /refresh              reload the conversation list");
    println!("  /quit                 exit");
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{speaker}> {}", message.content);
    }
}

async fn print_conversations(controller: &SessionController) {
    let active = controller.active_conversation_id().await;
    let conversations = controller.conversations().await;
    if conversations.is_empty() {
        println!("(no conversations)");
    }
    for conversation in conversations {
        let marker = if Some(conversation.id) == active { '*' } else { ' ' };
        println!(
            "{marker} {:>5}  {}  ({})",
            conversation.id,
            conversation.title,
            conversation.last_activity().format("%Y-%m-%d %H:%M")
        );
    }
}

/// Streams reveal frames to stdout as deltas over what is already printed.
fn spawn_event_printer(controller: &SessionController) -> tokio::task::JoinHandle<()> {
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        let mut printed = 0usize;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "console: event printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                ClientEvent::RevealProgress { content, .. } => {
                    if printed == 0 {
                        print!("assistant> ");
                    }
                    if let Some(delta) = content.get(printed..) {
                        print!("{delta}");
                        printed = content.len();
                    }
                    let _ = io::stdout().flush();
                }
                ClientEvent::RevealFinished { .. } => {
                    if printed > 0 {
                        println!();
                    }
                    printed = 0;
                }
                ClientEvent::TitleInferred { title, .. } => println!("[titled \"{title}\"]"),
                ClientEvent::SendFailed { error, .. } => eprintln!("send failed: {error}"),
                ClientEvent::Error(message) => eprintln!("error: {message}"),
                _ => {}
            }
        }
    })
}

async fn wait_until_idle(controller: &SessionController) {
    let mut phase = controller.subscribe_phase();
    let _ = phase.wait_for(|phase| *phase == SessionPhase::Idle).await;
}

async fn send(controller: &Arc<SessionController>, text: &str) -> Result<()> {
    match controller.send_message(text).await? {
        SendOutcome::Ignored(IgnoreReason::EmptyPrompt) => {}
        SendOutcome::Ignored(IgnoreReason::Busy) => println!("(still answering the last message)"),
        SendOutcome::Deferred { conversation_id } => {
            println!("[started conversation {conversation_id}]");
            // Navigating to the new conversation confirms it and releases the prompt.
            controller.sync_route(Some(conversation_id)).await?;
        }
        SendOutcome::Delivered { .. } => {}
    }
    wait_until_idle(controller).await;
    Ok(())
}

async fn run(controller: &Arc<SessionController>, command: Command) -> Result<bool> {
    match command {
        Command::Prompt(text) => send(controller, &text).await?,
        Command::List => print_conversations(controller).await,
        Command::New => {
            let conversation = controller.new_conversation().await?;
            println!("[opened conversation {}]", conversation.id);
        }
        Command::Open(id) => {
            controller.select_conversation(id).await?;
            print_transcript(&controller.snapshot().await.messages);
        }
        Command::Rename(id, title) => {
            controller.rename_conversation(id, &title).await?;
            println!("[renamed {id}]");
        }
        Command::Delete(id) => {
            controller.delete_conversation(id).await?;
            println!("[deleted {id}]");
        }
        Command::Refresh => {
            controller.reload_conversations().await?;
            print_conversations(controller).await;
        }
        Command::Help => print_help(),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    args.apply(&mut settings);
    info!(api = settings.api_base_url.as_str(), "console: starting");

    let bridge = Arc::new(HttpPersistenceBridge::from_settings(&settings)?);
    let controller = SessionController::from_settings(bridge, &settings);
    let printer = spawn_event_printer(&controller);

    controller
        .sync_route(args.conversation.map(ConversationId))
        .await?;
    print_conversations(&controller).await;
    print_transcript(&controller.snapshot().await.messages);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        match run(&controller, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("error: {err:#}"),
        }
    }

    printer.abort();
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
