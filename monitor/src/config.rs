//! Configuration module for EVE Log Monitor.
//!
//! The engine never reads settings from a global: it is handed a
//! [`ConfigProvider`] at construction. [`MonitorConfig`] is the stock provider,
//! parsed from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `EVE_LOG_CHAT_DIR` | No | `<Documents>/EVE/logs/Chatlogs` | Chat log directory |
//! | `EVE_LOG_GAME_DIR` | No | `<Documents>/EVE/logs/Gamelogs` | Game log directory |
//! | `EVE_LOG_CHAT_ENABLED` | No | `true` | Monitor chat logs |
//! | `EVE_LOG_GAME_ENABLED` | No | `true` | Monitor game logs |
//! | `EVE_LOG_MINING_TIMEOUT_SECS` | No | 30 | Mining inactivity timeout (clamped to 15-120) |
//! | `EVE_LOG_DEBOUNCE_MS` | No | 100 | Nominal debounce interval |
//!
//! # Example
//!
//! ```no_run
//! use eve_log_monitor::config::MonitorConfig;
//!
//! let config = MonitorConfig::from_env().expect("Failed to load configuration");
//! println!("Chat logs: {}", config.chat_log_dir.display());
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use directories::UserDirs;
use thiserror::Error;
use tracing::debug;

use crate::trackers::mining_tracker::{
    clamp_timeout_secs, DEFAULT_MINING_TIMEOUT_SECS, MAX_MINING_TIMEOUT_SECS,
    MIN_MINING_TIMEOUT_SECS,
};

/// Default nominal debounce interval in milliseconds.
///
/// Carried for the settings collaborator; the engine coalesces with a fixed
/// delay (see [`crate::utils::debounce::DEBOUNCE_DELAY`]).
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Log root relative to the user's documents directory.
const DEFAULT_LOG_ROOT: [&str; 2] = ["EVE", "logs"];

/// Chat log directory name under the log root.
const CHAT_LOG_DIR_NAME: &str = "Chatlogs";

/// Game log directory name under the log root.
const GAME_LOG_DIR_NAME: &str = "Gamelogs";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the documents directory for default log paths.
    #[error("failed to determine documents directory")]
    NoDocumentsDirectory,
}

/// Read-only view of the settings the engine consumes.
///
/// Implemented by the host application's settings store; tests and the CLI
/// use [`MonitorConfig`].
pub trait ConfigProvider: Send + Sync {
    /// Directory containing `Local_*.txt` chat logs.
    fn chat_log_dir(&self) -> PathBuf;

    /// Directory containing game logs.
    fn game_log_dir(&self) -> PathBuf;

    /// Whether chat logs are monitored.
    fn chat_log_enabled(&self) -> bool;

    /// Whether game logs are monitored.
    fn game_log_enabled(&self) -> bool;

    /// Mining inactivity timeout in seconds, before clamping.
    fn mining_timeout_secs(&self) -> u64;

    /// Nominal debounce interval in milliseconds.
    fn debounce_ms(&self) -> u64;
}

/// Configuration for the EVE Log Monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Directory containing chat logs.
    pub chat_log_dir: PathBuf,

    /// Directory containing game logs.
    pub game_log_dir: PathBuf,

    /// Whether chat logs are monitored.
    pub chat_log_enabled: bool,

    /// Whether game logs are monitored.
    pub game_log_enabled: bool,

    /// Mining inactivity timeout in seconds, already clamped.
    pub mining_timeout_secs: u64,

    /// Nominal debounce interval in milliseconds.
    pub debounce_ms: u64,
}

impl MonitorConfig {
    /// Creates a configuration rooted at an EVE `logs` directory, with every
    /// other setting at its default.
    #[must_use]
    pub fn with_log_root(root: &Path) -> Self {
        Self {
            chat_log_dir: root.join(CHAT_LOG_DIR_NAME),
            game_log_dir: root.join(GAME_LOG_DIR_NAME),
            chat_log_enabled: true,
            game_log_enabled: true,
            mining_timeout_secs: DEFAULT_MINING_TIMEOUT_SECS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }

    /// Creates a new `MonitorConfig` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A boolean or numeric variable cannot be parsed
    /// - A log directory is not set and the documents directory cannot be
    ///   determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let chat_log_dir = match env::var("EVE_LOG_CHAT_DIR") {
            Ok(val) => PathBuf::from(val),
            Err(_) => default_log_root()?.join(CHAT_LOG_DIR_NAME),
        };

        let game_log_dir = match env::var("EVE_LOG_GAME_DIR") {
            Ok(val) => PathBuf::from(val),
            Err(_) => default_log_root()?.join(GAME_LOG_DIR_NAME),
        };

        let chat_log_enabled = parse_bool_var("EVE_LOG_CHAT_ENABLED", true)?;
        let game_log_enabled = parse_bool_var("EVE_LOG_GAME_ENABLED", true)?;

        let mining_timeout_secs = match env::var("EVE_LOG_MINING_TIMEOUT_SECS") {
            Ok(val) => {
                let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "EVE_LOG_MINING_TIMEOUT_SECS".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                let clamped = clamp_timeout_secs(secs);
                if clamped != secs {
                    debug!(
                        requested = secs,
                        clamped,
                        min = MIN_MINING_TIMEOUT_SECS,
                        max = MAX_MINING_TIMEOUT_SECS,
                        "Mining timeout clamped"
                    );
                }
                clamped
            }
            Err(_) => DEFAULT_MINING_TIMEOUT_SECS,
        };

        let debounce_ms = match env::var("EVE_LOG_DEBOUNCE_MS") {
            Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "EVE_LOG_DEBOUNCE_MS".to_string(),
                message: format!("expected non-negative integer, got '{val}'"),
            })?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        Ok(Self {
            chat_log_dir,
            game_log_dir,
            chat_log_enabled,
            game_log_enabled,
            mining_timeout_secs,
            debounce_ms,
        })
    }
}

impl ConfigProvider for MonitorConfig {
    fn chat_log_dir(&self) -> PathBuf {
        self.chat_log_dir.clone()
    }

    fn game_log_dir(&self) -> PathBuf {
        self.game_log_dir.clone()
    }

    fn chat_log_enabled(&self) -> bool {
        self.chat_log_enabled
    }

    fn game_log_enabled(&self) -> bool {
        self.game_log_enabled
    }

    fn mining_timeout_secs(&self) -> u64 {
        self.mining_timeout_secs
    }

    fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }
}

/// Settings the caller may change while the engine runs.
///
/// Written by [`LogReader`](crate::reader::LogReader) on the caller thread and
/// read by the engine when it executes the matching queued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSettings {
    /// Tracked character names, as the caller spelled them.
    pub characters: Vec<String>,
    pub chat_log_dir: PathBuf,
    pub game_log_dir: PathBuf,
    pub chat_log_enabled: bool,
    pub game_log_enabled: bool,
    pub mining_timeout_secs: u64,
}

impl SharedSettings {
    /// Captures the provider's current values with no tracked characters.
    #[must_use]
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self {
            characters: Vec::new(),
            chat_log_dir: provider.chat_log_dir(),
            game_log_dir: provider.game_log_dir(),
            chat_log_enabled: provider.chat_log_enabled(),
            game_log_enabled: provider.game_log_enabled(),
            mining_timeout_secs: clamp_timeout_secs(provider.mining_timeout_secs()),
        }
    }

    /// Replaces the provider-backed fields, keeping the character list.
    pub fn reload(&mut self, provider: &dyn ConfigProvider) {
        let characters = std::mem::take(&mut self.characters);
        *self = Self {
            characters,
            ..Self::from_provider(provider)
        };
    }
}

/// Lock-guarded settings shared between the caller and the engine.
pub type SharedSettingsHandle = Arc<Mutex<SharedSettings>>;

/// Clones the current settings out from under the lock.
#[must_use]
pub fn snapshot(handle: &SharedSettingsHandle) -> SharedSettings {
    handle.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Applies `update` to the settings under the lock.
pub fn update_settings(handle: &SharedSettingsHandle, update: impl FnOnce(&mut SharedSettings)) {
    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
    update(&mut guard);
}

/// Resolves `<Documents>/EVE/logs`.
fn default_log_root() -> Result<PathBuf, ConfigError> {
    let user_dirs = UserDirs::new().ok_or(ConfigError::NoDocumentsDirectory)?;
    let documents = user_dirs
        .document_dir()
        .ok_or(ConfigError::NoDocumentsDirectory)?;
    Ok(DEFAULT_LOG_ROOT
        .iter()
        .fold(documents.to_path_buf(), |path, part| path.join(part)))
}

/// Parses a boolean environment variable, accepting `true/false/1/0/yes/no`.
fn parse_bool_var(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };

    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{val}'"),
        }),
    }
}
