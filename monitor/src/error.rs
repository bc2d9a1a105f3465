//! Error types for the EVE Log Monitor.
//!
//! This module defines the error types used throughout the monitor crate,
//! providing structured error handling with clear, human-readable messages.
//! None of these cross the engine thread boundary: the engine logs and contains
//! every failure, so callers of [`LogReader`](crate::reader::LogReader) only see
//! them while spawning the engine.

use thiserror::Error;

use crate::config::ConfigError;
use crate::watcher::WatcherError;

/// Errors that can occur during monitor operations.
///
/// This is the primary error type for the monitor crate, encompassing all
/// possible failure modes.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching error.
    ///
    /// This variant covers errors from the file system watcher used to monitor
    /// the chat and game log directories.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),

    /// A built-in log pattern failed to compile.
    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// The engine thread is gone and can no longer accept commands.
    #[error("monitor engine is not running")]
    EngineUnavailable,
}

/// A log-matching pattern could not be compiled.
#[derive(Error, Debug)]
pub enum PatternError {
    /// The regular expression for the named pattern is invalid.
    #[error("invalid {name} pattern: {source}")]
    Invalid {
        /// Short name of the pattern (e.g. `listener`, `jump`).
        name: &'static str,
        /// Underlying regex compilation error.
        #[source]
        source: regex::Error,
    },
}

impl PatternError {
    /// Wraps a regex compilation error for the named pattern.
    pub(crate) fn invalid(name: &'static str, source: regex::Error) -> Self {
        Self::Invalid { name, source }
    }
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
