//! EVE Log Monitor - chat and game log watcher.
//!
//! This binary runs the monitoring engine and prints its events as JSON
//! lines on stdout. Logs go to stderr.
//!
//! # Commands
//!
//! - `eve-log-monitor run -c <character>...`: Monitor the given characters
//! - `eve-log-monitor listeners [dir]`: Print which character owns which log
//!
//! # Environment Variables
//!
//! See the [`config`](eve_log_monitor::config) module for available
//! configuration options.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use eve_log_monitor::config::MonitorConfig;
use eve_log_monitor::listener::{
    ListenerMapBuilder, CHAT_HEADER_LINES, CHAT_LOG_FILTER, DEFAULT_MAX_AGE_HOURS,
    GAME_HEADER_LINES, GAME_LOG_FILTER,
};
use eve_log_monitor::reader::LogReader;
use eve_log_monitor::types::MonitorEvent;

/// EVE Log Monitor - chat and game log watcher for EVE Online.
///
/// Tails the EVE client's logs and reports system changes, fleet and warp
/// notifications, and mining sessions for the tracked characters.
#[derive(Parser, Debug)]
#[command(name = "eve-log-monitor")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    EVE_LOG_CHAT_DIR             Chat log directory (default: ~/Documents/EVE/logs/Chatlogs)
    EVE_LOG_GAME_DIR             Game log directory (default: ~/Documents/EVE/logs/Gamelogs)
    EVE_LOG_CHAT_ENABLED         Monitor chat logs (default: true)
    EVE_LOG_GAME_ENABLED         Monitor game logs (default: true)
    EVE_LOG_MINING_TIMEOUT_SECS  Mining inactivity timeout, 15-120 (default: 30)
    EVE_LOG_DEBOUNCE_MS          Debounce setting in milliseconds (default: 100)
    RUST_LOG                     Log filter (default: info)

EXAMPLES:
    # Monitor two characters
    eve-log-monitor run -c \"Jane Doe\" -c \"John Roe\"

    # Show which character owns which game log
    eve-log-monitor listeners --game
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor characters and print events as JSON lines.
    Run {
        /// Character to track; repeat for several.
        #[arg(short, long = "character", required = true)]
        characters: Vec<String>,

        /// Do not read chat logs.
        #[arg(long)]
        no_chat: bool,

        /// Do not read game logs.
        #[arg(long)]
        no_game: bool,
    },

    /// Print the character-to-log-file map of a log directory.
    Listeners {
        /// Directory to scan (default: the configured chat or game log directory).
        dir: Option<PathBuf>,

        /// Scan for game logs instead of Local chat logs.
        #[arg(short, long)]
        game: bool,

        /// Ignore files older than this many hours.
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_HOURS)]
        max_age_hours: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Run {
            characters,
            no_chat,
            no_game,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_monitor(characters, no_chat, no_game))
        }
        Command::Listeners {
            dir,
            game,
            max_age_hours,
        } => run_listeners(dir, game, max_age_hours),
    }
}

/// Runs the monitor until a shutdown signal arrives.
async fn run_monitor(characters: Vec<String>, no_chat: bool, no_game: bool) -> Result<()> {
    info!("Starting EVE Log Monitor");

    let mut config = MonitorConfig::from_env().context("Failed to load configuration")?;
    config.chat_log_enabled &= !no_chat;
    config.game_log_enabled &= !no_game;

    info!(
        chat_dir = %config.chat_log_dir.display(),
        game_dir = %config.game_log_dir.display(),
        chat_enabled = config.chat_log_enabled,
        game_enabled = config.game_log_enabled,
        mining_timeout_secs = config.mining_timeout_secs,
        "Configuration loaded"
    );

    let (reader, mut events) =
        LogReader::spawn(Arc::new(config)).context("Failed to start log monitor")?;
    reader
        .set_characters(characters)
        .context("Failed to set tracked characters")?;
    reader.start().context("Failed to start monitoring")?;

    info!("Monitor running. Press Ctrl+C to stop.");

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            event = events.recv() => {
                match event {
                    Some(event) => print_event(&event)?,
                    None => {
                        warn!("Monitor engine exited");
                        break;
                    }
                }
            }
        }
    }

    info!("Shutting down...");

    let mut systems: Vec<_> = reader.known_systems().into_iter().collect();
    systems.sort();
    for (character, system) in systems {
        info!(character = %character, system = %system, "Last known system");
    }

    // Dropping the reader joins its threads
    tokio::task::spawn_blocking(move || drop(reader))
        .await
        .context("Failed to shut down log monitor")?;

    info!("Shutdown complete");
    Ok(())
}

/// Prints the listener map of a directory, sorted by character.
fn run_listeners(dir: Option<PathBuf>, game: bool, max_age_hours: u64) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => {
            let config = MonitorConfig::from_env().context("Failed to load configuration")?;
            if game {
                config.game_log_dir
            } else {
                config.chat_log_dir
            }
        }
    };

    let (filter, header_lines) = if game {
        (GAME_LOG_FILTER, GAME_HEADER_LINES)
    } else {
        (CHAT_LOG_FILTER, CHAT_HEADER_LINES)
    };

    let mut builder = ListenerMapBuilder::new().context("Failed to compile listener pattern")?;
    let mut entries: Vec<_> = builder
        .build(&dir, &[filter], header_lines, max_age_hours)
        .into_iter()
        .collect();
    entries.sort();

    if entries.is_empty() {
        warn!(dir = %dir.display(), "No recent log files with a listener line found");
    }

    let mut stdout = io::stdout().lock();
    for (character, path) in entries {
        writeln!(stdout, "{character}\t{}", path.display()).context("Failed to write output")?;
    }
    Ok(())
}

/// Writes one event to stdout as a JSON line.
fn print_event(event: &MonitorEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("Failed to serialize event")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}").context("Failed to write event")?;
    stdout.flush().context("Failed to flush stdout")
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
