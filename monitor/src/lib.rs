//! EVE Log Monitor - chat and game log watcher for EVE Online clients.
//!
//! This crate tails the chat and game logs the EVE client writes, works out
//! which log belongs to which tracked character, and turns new lines into
//! structured events: solar system changes, fleet and warp notifications,
//! compression, decloaks, and inferred mining sessions.
//!
//! # Overview
//!
//! A [`LogReader`] owns a dedicated engine thread. Callers post commands to
//! it and receive [`MonitorEvent`]s on a channel; nothing the engine does ever
//! runs on, or blocks, the caller's thread.
//!
//! # Modules
//!
//! - [`reader`]: Caller-facing handle and event relay
//! - [`engine`]: Watch orchestration, running on its own thread
//! - [`listener`]: Character-to-log-file resolution with directory mtime caching
//! - [`tail`]: Incremental reads and last-matching-line lookups
//! - [`parser`]: Line normalization and classification
//! - [`trackers`]: Per-character location and mining session state
//! - [`watcher`]: File system watching abstraction
//! - [`config`]: Configuration provider and environment parsing
//! - [`types`]: Event types
//! - [`error`]: Error types for monitor operations
//! - [`utils`]: Shared utilities (debouncing, encoding)

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod parser;
pub mod reader;
pub mod tail;
pub mod trackers;
pub mod types;
pub mod utils;
pub mod watcher;

pub use config::{ConfigError, ConfigProvider, MonitorConfig, SharedSettings};
pub use engine::{Command, Engine};
pub use error::{MonitorError, PatternError, Result};
pub use listener::ListenerMapBuilder;
pub use parser::{ClassifyOptions, LineClassifier, LineEvent};
pub use reader::LogReader;
pub use tail::{find_last_matching_line, read_new_lines, FileWatchState, TailError, TailRead};
pub use trackers::{LocationTracker, MiningPhase, MiningSessionTracker, MiningTransition};
pub use types::{CharacterLocation, CombatEventType, LogSource, MonitorEvent};
pub use utils::{DebounceDecision, DebounceScheduler};
pub use watcher::{LogWatcher, NotifyWatcher, NullWatcher, WatchNotification, WatcherError};
