//! Character-to-log-file resolution.
//!
//! Every EVE log file names its owning character in a `Listener:` header
//! line. [`ListenerMapBuilder`] scans a log directory and maps each lowercased
//! character name to the most recently modified file that lists them.
//!
//! Scans are cached per directory and filter set against the directory's own
//! modification time. Appending to a log changes the file's mtime but not the
//! directory's, so a burst of writes never triggers a rescan; creating,
//! removing, or renaming a file does.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::error::PatternError;
use crate::utils::encoding::{split_lines, LogEncoding};

/// Files last modified longer ago than this are ignored.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 24;

/// Glob matching chat logs of the Local channel.
pub const CHAT_LOG_FILTER: &str = "Local_*.txt";

/// Header lines preceding the listener line in a chat log.
pub const CHAT_HEADER_LINES: usize = 8;

/// Glob matching game logs.
pub const GAME_LOG_FILTER: &str = "*.txt";

/// Header lines preceding the listener line in a game log.
pub const GAME_HEADER_LINES: usize = 2;

/// Bytes read from the start of a file to find the listener line.
const HEADER_READ_BYTES: u64 = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    directory: PathBuf,
    filters: Vec<String>,
    header_lines: usize,
}

#[derive(Debug)]
struct CacheEntry {
    directory_modified: SystemTime,
    map: HashMap<String, PathBuf>,
}

/// Builds and caches listener maps.
#[derive(Debug)]
pub struct ListenerMapBuilder {
    listener_pattern: Regex,
    cache: HashMap<CacheKey, CacheEntry>,
}

impl ListenerMapBuilder {
    /// Creates a builder with an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener pattern fails to compile.
    pub fn new() -> Result<Self, PatternError> {
        let listener_pattern = Regex::new(r"Listener:\s+(.+)")
            .map_err(|e| PatternError::invalid("listener", e))?;
        Ok(Self {
            listener_pattern,
            cache: HashMap::new(),
        })
    }

    /// Maps lowercased character names to their newest log file in `directory`.
    ///
    /// Only files whose name matches one of `filters` and that were modified
    /// in the last `max_age_hours` are considered. The listener line is the
    /// one following `header_lines` header lines.
    ///
    /// An unreadable directory yields an empty map; unreadable files are
    /// skipped.
    pub fn build(
        &mut self,
        directory: &Path,
        filters: &[&str],
        header_lines: usize,
        max_age_hours: u64,
    ) -> HashMap<String, PathBuf> {
        let Some(directory_modified) = fs::metadata(directory)
            .and_then(|m| m.modified())
            .ok()
        else {
            debug!(directory = %directory.display(), "Log directory unavailable");
            return HashMap::new();
        };

        let key = CacheKey {
            directory: directory.to_path_buf(),
            filters: filters.iter().map(|f| (*f).to_string()).collect(),
            header_lines,
        };

        if let Some(entry) = self.cache.get(&key) {
            if directory_modified <= entry.directory_modified {
                trace!(directory = %directory.display(), "Listener map cache hit");
                return entry.map.clone();
            }
        }

        let map = self.scan(directory, filters, header_lines, max_age_hours);
        debug!(
            directory = %directory.display(),
            characters = map.len(),
            "Rebuilt listener map"
        );

        self.cache.insert(
            key,
            CacheEntry {
                directory_modified,
                map: map.clone(),
            },
        );
        map
    }

    /// Drops every cached map so the next build rescans.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    fn scan(
        &self,
        directory: &Path,
        filters: &[&str],
        header_lines: usize,
        max_age_hours: u64,
    ) -> HashMap<String, PathBuf> {
        let Some(globs) = compile_filters(filters) else {
            return HashMap::new();
        };

        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(directory = %directory.display(), error = %e, "Failed to read log directory");
                return HashMap::new();
            }
        };

        let mut candidates: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| globs.is_match(entry.file_name()))
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some((metadata.modified().ok()?, entry.path()))
            })
            .collect();

        // Newest first so the first file seen for a character wins
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let max_age = Duration::from_secs(max_age_hours * 3600);
        let now = SystemTime::now();
        let mut map = HashMap::new();

        for (modified, path) in candidates {
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                trace!(path = %path.display(), "Skipping stale log file");
                continue;
            }

            let Some(name) = self.read_listener(&path, header_lines) else {
                continue;
            };
            map.entry(name.to_lowercase()).or_insert(path);
        }

        map
    }

    /// Reads the listener name from the line after `header_lines` lines.
    fn read_listener(&self, path: &Path, header_lines: usize) -> Option<String> {
        let mut head = Vec::new();
        let read = File::open(path)
            .and_then(|file| file.take(HEADER_READ_BYTES).read_to_end(&mut head));
        if let Err(e) = read {
            trace!(path = %path.display(), error = %e, "Skipping unreadable log file");
            return None;
        }

        let (encoding, bom_len) = LogEncoding::detect(&head);
        let text = encoding.decode(&head[bom_len..]);
        let line = split_lines(&text).nth(header_lines)?;

        let name = self.listener_pattern.captures(line)?.get(1)?.as_str().trim();
        if name.is_empty() {
            return None;
        }
        Some(name.to_string())
    }
}

fn compile_filters(filters: &[&str]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for filter in filters {
        match Glob::new(filter) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(filter = %filter, error = %e, "Ignoring invalid log filter"),
        }
    }

    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            warn!(error = %e, "Failed to build log filter set");
            None
        }
    }
}
