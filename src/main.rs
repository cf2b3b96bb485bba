#![forbid(unsafe_code)]

//! `gemini-acp`: terminal host for a Gemini CLI agent session.
//!
//! Every stdin line is sent as a prompt, except for a few commands:
//!
//! - `/cancel` asks the agent to cancel the current turn;
//! - `/allow <request-id> <option-id>` answers a permission request;
//! - `/quit` ends the session.
//!
//! `--prompt <text>` queues an opening prompt that goes out right after the
//! handshake.
//!
//! Agent output goes to stdout, logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use gemini_acp::acp::message::RequestId;
use gemini_acp::acp::permission::PermissionRequest;
use gemini_acp::{AcpClient, AgentEvent, AppError, ClientConfig, ClientOptions, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "gemini-acp",
    about = "Chat with a Gemini CLI agent over ACP",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent executable, overriding `gemini_command`.
    #[arg(long)]
    command: Option<String>,

    /// API key, overriding the keychain and environment.
    #[arg(long)]
    api_key: Option<String>,

    /// Session working directory, overriding every other source.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Prompt to send as soon as the session is ready.
    #[arg(long)]
    prompt: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Open project folders; the first existing one becomes the working
    /// directory.
    folders: Vec<PathBuf>,
}

/// A parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Prompt(String),
    Cancel,
    Allow { request_id: RequestId, option_id: String },
    Quit,
    Empty,
    Invalid(String),
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::default(),
    };
    init_tracing(args.log_format, &config.log_level)?;
    info!("gemini-acp bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args, config))
}

async fn run(args: Cli, mut config: ClientConfig) -> Result<()> {
    // ── Resolve credentials and working directory ───────
    let api_key_override = args.api_key.filter(|k| !k.is_empty());
    if api_key_override.is_none() {
        config.load_credentials().await;
        if config.api_key.is_none() {
            info!("no API key configured; relying on the agent's own credentials");
        }
    }

    if let Some(cwd) = args.cwd {
        config.working_directory = Some(cwd);
    }
    let working_directory = config.resolve_working_directory(&args.folders);
    info!(cwd = %working_directory.display(), "configuration loaded");

    // ── Start the engine ────────────────────────────────
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let client = Arc::new(AcpClient::new(
        working_directory,
        ClientOptions::from(&config),
        Arc::new(events_tx),
    ));

    let started = client
        .start_configured(&config, api_key_override.as_deref(), args.command.as_deref())
        .await;
    if let Err(err) = started {
        // Already reported through the sink; drain it so the user sees it.
        while let Ok(event) = events_rx.try_recv() {
            render_event(&event);
        }
        return Err(err);
    }
    if let Some(text) = args.prompt.filter(|t| !t.trim().is_empty()) {
        if let Err(err) = client.submit_text(text) {
            client.stop().await;
            return Err(err);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // ── Main loop ───────────────────────────────────────
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(AgentEvent::Exited) | None => {
                    render_event(&AgentEvent::Exited);
                    break;
                }
                Some(event) => render_event(&event),
            },

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(&client, parse_command(&line)).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    stdin_open = false;
                }
                Err(err) => {
                    warn!(%err, "failed to read stdin");
                    stdin_open = false;
                }
            },

            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(%err, "ctrl-c signal handler failed");
                }
                info!("interrupt received");
                break;
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    client.stop().await;
    while let Ok(event) = events_rx.try_recv() {
        if event != AgentEvent::Exited {
            render_event(&event);
        }
    }
    info!("gemini-acp shut down");
    Ok(())
}

/// Execute one stdin command. Returns `false` when the session should end.
async fn handle_command(client: &AcpClient, command: Command) -> bool {
    match command {
        Command::Prompt(text) => {
            if let Err(err) = client.submit_text(text) {
                eprintln!("Error: {err}");
                return false;
            }
        }
        Command::Cancel => {
            if let Err(err) = client.cancel().await {
                eprintln!("Error: {err}");
            }
        }
        Command::Allow {
            request_id,
            option_id,
        } => {
            if let Err(err) = client.respond_to_permission(&request_id, &option_id).await {
                eprintln!("Error: {err}");
            }
        }
        Command::Quit => return false,
        Command::Empty => {}
        Command::Invalid(usage) => eprintln!("Usage: {usage}"),
    }
    true
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let mut parts = trimmed.split_whitespace();
    match parts.next() {
        Some("/quit") => Command::Quit,
        Some("/cancel") => Command::Cancel,
        Some("/allow") => match (parts.next(), parts.next()) {
            (Some(request_id), Some(option_id)) => Command::Allow {
                request_id: parse_request_id(request_id),
                option_id: option_id.to_owned(),
            },
            _ => Command::Invalid("/allow <request-id> <option-id>".into()),
        },
        _ => Command::Prompt(line.to_owned()),
    }
}

fn parse_request_id(raw: &str) -> RequestId {
    raw.parse::<i64>()
        .map_or_else(|_| RequestId::from(raw), RequestId::Number)
}

fn render_event(event: &AgentEvent) {
    match event {
        // Chunks arrive mid-sentence; print them without a line break.
        AgentEvent::Message { text } => {
            print!("{text}");
            if let Err(err) = std::io::stdout().flush() {
                warn!(%err, "failed to flush stdout");
            }
        }
        AgentEvent::Thought { text } => println!("(thinking) {text}"),
        AgentEvent::Error { message } => eprintln!("Error: {message}"),
        AgentEvent::Stopped { stop_reason, .. } => println!("\n[turn finished: {stop_reason}]"),
        AgentEvent::PermissionRequested(request) => render_permission(request),
        AgentEvent::SessionReady => println!("[session ready]"),
        AgentEvent::Exited => println!("[agent exited]"),
    }
}

fn render_permission(request: &PermissionRequest) {
    println!(
        "[permission {}] {}",
        request.request_id,
        request.tool_call.display_title()
    );
    if let Some(diff) = request.tool_call.diff() {
        let patch = diff.unified();
        if !patch.is_empty() {
            println!("{patch}");
        }
    }
    for option in &request.options {
        println!("  /allow {} {}  ({})", request.request_id, option.option_id, option.label());
    }
}

fn init_tracing(log_format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
