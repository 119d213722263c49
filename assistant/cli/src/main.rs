//! Assistant Chat - Terminal front end for the streaming assistant
//!
//! Reads prompts from stdin, streams answers to stdout.
//!
//! # Usage
//!
//! ```bash
//! # Chat with defaults (key from DEEPSEEK_API_KEY)
//! assistant-chat
//!
//! # Attach the file you are working on
//! assistant-chat --current-file src/main.rs --file src/lib.rs
//!
//! # Different model, no key check
//! assistant-chat --model deepseek-chat --skip-key-check
//!
//! # Verbose logging
//! RUST_LOG=debug assistant-chat
//! ```
//!
//! # Signals
//!
//! - `SIGINT` while an answer streams: cancel it
//! - `SIGINT` while idle: quit

mod commands;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use assistant_core::{
    config::{default_config_path, load_config_from_path, ConfigOverrides},
    ChatSession, EventSink, FsContextProvider, HttpTransport, JsonFileStore, MemoryStore,
    SessionSettings, SinkMessage, StateStore, Transport,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use commands::{dispatch, Command, Flow};
use render::Renderer;

/// Assistant Chat - stream answers from a DeepSeek-compatible API
#[derive(Parser, Debug)]
#[command(name = "assistant-chat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ASSISTANT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model identifier
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Chat completions endpoint
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Maximum tokens per answer
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Where to keep chat state between runs
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// File being worked on (sent with every prompt)
    #[arg(long, value_name = "PATH")]
    current_file: Option<PathBuf>,

    /// Extra project file to attach (repeatable)
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Skip the balance endpoint check before starting
    #[arg(long)]
    skip_key_check: bool,

    /// Keep state in memory only
    #[arg(long)]
    no_state: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ASSISTANT_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout carries the conversation.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "assistant_cli={level},assistant_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Configuration: defaults < file < env < CLI
    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(model) = args.model.clone() {
        overrides = overrides.with_model(model);
    }
    if let Some(endpoint) = args.endpoint.clone() {
        overrides = overrides.with_endpoint(endpoint);
    }
    if let Some(tokens) = args.max_tokens {
        overrides = overrides.with_max_tokens(tokens);
    }
    if let Some(path) = args.state_file.clone() {
        overrides = overrides.with_state_path(path);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line option")?;

    info!(
        source = %config.source(),
        model = %config.model,
        endpoint = %config.endpoint,
        "Configuration loaded"
    );

    if config.api_key.is_empty() {
        anyhow::bail!("No API key configured. Set DEEPSEEK_API_KEY or api.api_key in the config file.");
    }

    let transport =
        HttpTransport::new(Duration::from_secs(10)).context("Failed to create HTTP client")?;

    if !args.skip_key_check
        && !transport
            .check_api_key(&config.balance_endpoint, &config.api_key)
            .await
    {
        anyhow::bail!(
            "The API key was rejected or the account has no balance ({}).",
            config.balance_endpoint
        );
    }

    let store: Arc<dyn StateStore> = match (&config.state_path, args.no_state) {
        (Some(path), false) => {
            info!(path = %path.display(), "Using state file");
            Arc::new(JsonFileStore::new(path.clone()))
        }
        _ => Arc::new(MemoryStore::new()),
    };

    // Sink: one channel, drained by the renderer task
    let (tx, mut rx) = mpsc::unbounded_channel::<SinkMessage>();
    let printer = tokio::spawn(async move {
        let mut renderer = Renderer::new(std::io::stdout(), std::io::stderr());
        while let Some(message) = rx.recv().await {
            if let Err(e) = renderer.handle(&message) {
                warn!(error = %e, "Terminal write failed");
                break;
            }
        }
    });
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    let mut session = ChatSession::new(
        transport,
        Arc::new(FsContextProvider::new()),
        store,
        sink,
        SessionSettings::from_config(&config),
    );

    session
        .restore()
        .await
        .context("Failed to restore chat state")?;
    if let Some(ref current) = args.current_file {
        session
            .set_current_file(Some(path_arg(current).as_str()))
            .await
            .context("Failed to attach current file")?;
    }
    if !args.files.is_empty() {
        let paths: Vec<String> = args.files.iter().map(|p| path_arg(p)).collect();
        session
            .add_files(&paths)
            .await
            .context("Failed to attach files")?;
    }

    // Ctrl-C cancels the active stream, or quits when idle
    let (quit_tx, mut quit_rx) = watch::channel(false);
    let handle = session.abort_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.cancel() {
                info!("Request cancelled");
            } else {
                let _ = quit_tx.send(true);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = quit_rx.changed() => break,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if dispatch(&mut session, Command::parse(line)).await == Flow::Quit {
            break;
        }
    }

    info!("Shutting down...");
    session
        .save_state()
        .await
        .context("Failed to save chat state")?;

    // Dropping the session closes the sink channel
    drop(session);
    let _ = printer.await;

    Ok(())
}
