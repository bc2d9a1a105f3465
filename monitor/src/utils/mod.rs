//! Utility modules for the EVE log monitor.
//!
//! # Modules
//!
//! - [`debounce`]: Per-file debounce scheduling for change notifications
//! - [`encoding`]: Encoding detection and line splitting for log files

pub mod debounce;
pub mod encoding;

pub use debounce::{DebounceDecision, DebounceScheduler, DEBOUNCE_DELAY, MIN_PROCESS_INTERVAL};
pub use encoding::{split_lines, LogEncoding};
