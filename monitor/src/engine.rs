//! The log monitoring engine.
//!
//! The engine owns every watch, offset, timer, and per-character table. It
//! runs as an actor: one task on one dedicated thread receives [`Command`]s
//! and [`WatchNotification`]s and wakes for its own deadlines, so none of its
//! state is shared or locked. The caller-facing handle lives in
//! [`crate::reader`].
//!
//! # Flow
//!
//! ```text
//! directory change ──> listener maps ──> reconcile watched files ──> seed
//! file change ──> debounce ──> tail ──> classify ──> location / mining ──> event
//! ```
//!
//! The only state the engine reads from outside is [`SharedSettings`], which
//! it snapshots whenever it starts or is told a setting changed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{snapshot, SharedSettings, SharedSettingsHandle};
use crate::error::PatternError;
use crate::listener::{
    ListenerMapBuilder, CHAT_HEADER_LINES, CHAT_LOG_FILTER, DEFAULT_MAX_AGE_HOURS,
    GAME_HEADER_LINES, GAME_LOG_FILTER,
};
use crate::parser::{ClassifyOptions, LineClassifier, LineEvent};
use crate::tail::{find_last_matching_line, read_new_lines, FileWatchState, DEFAULT_TAIL_SIZE_BYTES};
use crate::trackers::{LocationTracker, MiningSessionTracker, MiningTransition};
use crate::types::{CharacterLocation, CombatEventType, LogSource, MonitorEvent};
use crate::utils::debounce::DebounceScheduler;
use crate::watcher::{LogWatcher, WatchNotification};

/// Interval of the safety-net rescan.
pub const RESCAN_INTERVAL: Duration = Duration::from_secs(300);

/// Operations queued to the engine, executed in the order they were posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Refresh,
    /// The tracked character list changed.
    CharactersChanged,
    /// A log directory changed.
    DirectoriesChanged,
    /// The chat or game enable flag changed.
    EnableFlagsChanged,
    /// Any other setting changed, such as the mining timeout.
    SettingsChanged,
    /// Stop and exit the engine loop.
    Shutdown,
}

/// A file the engine is tailing on behalf of a character.
#[derive(Debug)]
struct WatchedFile {
    character: String,
    source: LogSource,
    state: FileWatchState,
}

/// The monitoring engine. See the module documentation.
pub struct Engine {
    settings: SharedSettingsHandle,
    active: SharedSettings,
    watcher: Box<dyn LogWatcher>,
    classifier: LineClassifier,
    listeners: ListenerMapBuilder,
    debounce: DebounceScheduler,
    mining: MiningSessionTracker,
    locations: LocationTracker,
    files: HashMap<PathBuf, WatchedFile>,
    directories: HashSet<PathBuf>,
    /// Lowercased names of characters whose location has been seeded.
    seeded: HashSet<String>,
    next_rescan: Option<Instant>,
    running: bool,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl Engine {
    /// Creates a stopped engine.
    ///
    /// # Errors
    ///
    /// Returns an error if a log pattern fails to compile.
    pub fn new(
        settings: SharedSettingsHandle,
        watcher: Box<dyn LogWatcher>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Result<Self, PatternError> {
        let active = snapshot(&settings);
        Ok(Self {
            settings,
            active,
            watcher,
            classifier: LineClassifier::new()?,
            listeners: ListenerMapBuilder::new()?,
            debounce: DebounceScheduler::new(),
            mining: MiningSessionTracker::new(),
            locations: LocationTracker::new(),
            files: HashMap::new(),
            directories: HashSet::new(),
            seeded: HashSet::new(),
            next_rescan: None,
            running: false,
            events,
        })
    }

    /// Runs the engine loop until [`Command::Shutdown`] arrives or every
    /// command sender is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notifications: mpsc::Receiver<WatchNotification>,
    ) {
        debug!("Engine loop started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => {
                            self.stop();
                            break;
                        }
                        Some(command) => self.handle_command(command, Instant::now()),
                    }
                }

                Some(notification) = notifications.recv() => {
                    self.handle_notification(notification, Instant::now());
                }

                () = sleep_until_deadline(deadline) => {
                    self.handle_timers(Instant::now());
                }
            }
        }

        debug!("Engine loop terminated");
    }

    /// Executes one queued command.
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        trace!(command = ?command, "Handling command");
        match command {
            Command::Start => self.start(now),
            Command::Stop | Command::Shutdown => self.stop(),
            Command::Refresh
            | Command::CharactersChanged
            | Command::DirectoriesChanged
            | Command::EnableFlagsChanged
            | Command::SettingsChanged => self.refresh(now),
        }
    }

    /// Routes a watcher notification.
    pub fn handle_notification(&mut self, notification: WatchNotification, now: Instant) {
        if !self.running {
            trace!(notification = ?notification, "Ignoring notification while stopped");
            return;
        }

        match notification {
            WatchNotification::DirectoryChanged(directory) => {
                if self.directories.contains(&directory) {
                    debug!(directory = %directory.display(), "Log directory changed");
                    self.reconcile(now);
                }
            }
            WatchNotification::FileChanged(path) => self.on_file_changed(&path, now),
        }
    }

    /// Fires every debounce, mining, and rescan deadline that has passed.
    pub fn handle_timers(&mut self, now: Instant) {
        if !self.running {
            return;
        }

        for path in self.debounce.take_due(now) {
            if let Some(file) = self.files.get_mut(&path) {
                file.state.last_processed = Some(now);
            }
            self.tail_and_parse(&path, now);
        }

        for character in self.mining.expire(now) {
            self.emit_combat(&character, CombatEventType::MiningStopped, "Mining stopped".to_string());
        }

        if self.next_rescan.is_some_and(|at| at <= now) {
            self.rescan(now);
        }
    }

    /// Earliest deadline the engine must wake up for.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.running {
            return None;
        }
        [
            self.debounce.next_deadline(),
            self.mining.next_deadline(),
            self.next_rescan,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Files currently tailed, sorted.
    #[must_use]
    pub fn watched_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.files.keys().cloned().collect();
        files.sort();
        files
    }

    /// Directories currently watched, sorted.
    #[must_use]
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut directories: Vec<PathBuf> = self.directories.iter().cloned().collect();
        directories.sort();
        directories
    }

    /// Last known location of `character`.
    #[must_use]
    pub fn location(&self, character: &str) -> Option<&CharacterLocation> {
        self.locations.get(character)
    }

    fn start(&mut self, now: Instant) {
        if self.running {
            debug!("Engine already running");
            return;
        }

        self.active = snapshot(&self.settings);
        self.running = true;
        info!(
            characters = self.active.characters.len(),
            chat_enabled = self.active.chat_log_enabled,
            game_enabled = self.active.game_log_enabled,
            "Starting log monitoring"
        );

        self.apply_directories();
        self.reconcile(now);
        self.next_rescan = Some(now + RESCAN_INTERVAL);
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        self.debounce.clear();
        self.mining.clear();
        self.next_rescan = None;

        for path in self.files.keys() {
            if let Err(e) = self.watcher.unwatch_file(path) {
                debug!(path = %path.display(), error = %e, "Failed to remove file watch");
            }
        }
        self.files.clear();

        for directory in self.directories.drain() {
            if let Err(e) = self.watcher.unwatch_directory(&directory) {
                debug!(directory = %directory.display(), error = %e, "Failed to remove directory watch");
            }
        }

        self.listeners.invalidate();
        self.locations.clear();
        self.seeded.clear();
        info!("Stopped log monitoring");
    }

    fn refresh(&mut self, now: Instant) {
        if !self.running {
            trace!("Refresh ignored while stopped");
            return;
        }

        self.active = snapshot(&self.settings);
        self.apply_directories();
        self.reconcile(now);
    }

    fn rescan(&mut self, now: Instant) {
        debug!("Periodic rescan");
        self.next_rescan = Some(now + RESCAN_INTERVAL);
        self.listeners.invalidate();
        self.apply_directories();
        self.reconcile(now);

        // Catch appends whose notifications were lost or rate limited
        for path in self.watched_files() {
            self.recheck_file(&path, now);
        }
    }

    /// Brings directory watches in line with the active settings.
    fn apply_directories(&mut self) {
        let mut desired = HashSet::new();
        for (enabled, directory) in [
            (self.active.chat_log_enabled, &self.active.chat_log_dir),
            (self.active.game_log_enabled, &self.active.game_log_dir),
        ] {
            if !enabled {
                continue;
            }
            if directory.is_dir() {
                desired.insert(directory.clone());
            } else {
                warn!(directory = %directory.display(), "Log directory does not exist, skipping");
            }
        }

        let stale: Vec<PathBuf> = self.directories.difference(&desired).cloned().collect();
        for directory in stale {
            self.directories.remove(&directory);
            if let Err(e) = self.watcher.unwatch_directory(&directory) {
                debug!(directory = %directory.display(), error = %e, "Failed to remove directory watch");
            }
        }

        for directory in desired {
            if self.directories.contains(&directory) {
                continue;
            }
            if let Err(e) = self.watcher.watch_directory(&directory) {
                warn!(directory = %directory.display(), error = %e, "Failed to watch log directory");
            }
            self.directories.insert(directory);
        }
    }

    /// Resolves every tracked character's files and migrates watches.
    fn reconcile(&mut self, now: Instant) {
        let chat_dir = self.active.chat_log_dir.clone();
        let game_dir = self.active.game_log_dir.clone();

        let chat_map = if self.directories.contains(&chat_dir) {
            self.listeners.build(
                &chat_dir,
                &[CHAT_LOG_FILTER],
                CHAT_HEADER_LINES,
                DEFAULT_MAX_AGE_HOURS,
            )
        } else {
            HashMap::new()
        };
        let game_map = if self.directories.contains(&game_dir) {
            self.listeners.build(
                &game_dir,
                &[GAME_LOG_FILTER],
                GAME_HEADER_LINES,
                DEFAULT_MAX_AGE_HOURS,
            )
        } else {
            HashMap::new()
        };

        let characters = self.active.characters.clone();

        let mut desired: HashMap<PathBuf, (String, LogSource)> = HashMap::new();
        let mut to_seed: Vec<(String, Option<PathBuf>, Option<PathBuf>)> = Vec::new();

        for character in &characters {
            let key = character.to_lowercase();
            let chat = chat_map.get(&key).cloned();
            let game = game_map.get(&key).cloned();

            // Game logs carry everything chat logs do; chat is then only read to seed
            let tailed = game
                .clone()
                .map(|path| (path, LogSource::Game))
                .or_else(|| chat.clone().map(|path| (path, LogSource::Chat)));

            let newly_resolved = tailed
                .as_ref()
                .is_some_and(|(path, _)| !self.files.contains_key(path));
            let resolved_any = chat.is_some() || game.is_some();
            if resolved_any && (newly_resolved || !self.seeded.contains(&key)) {
                to_seed.push((character.clone(), chat, game));
            }

            if let Some((path, source)) = tailed {
                desired.insert(path, (character.clone(), source));
            }
        }

        let tracked: HashSet<String> = characters.iter().map(|c| c.to_lowercase()).collect();
        self.seeded.retain(|key| tracked.contains(key));
        self.mining
            .retain(|character| tracked.contains(&character.to_lowercase()));

        let stale: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(path, file)| {
                desired
                    .get(*path)
                    .is_none_or(|(character, source)| *character != file.character || *source != file.source)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            debug!(path = %path.display(), "File no longer referenced, removing watch");
            self.detach_file(&path);
        }

        for (character, chat, game) in to_seed {
            self.seed(&character, chat.as_deref(), game.as_deref());
            self.seeded.insert(character.to_lowercase());
        }

        for (path, (character, source)) in desired {
            if !self.files.contains_key(&path) {
                self.attach_file(path, character, source);
            }
        }

        trace!(files = self.files.len(), at = ?now, "Reconciled watched files");
    }

    /// Seeds a character's location from the newest matching log line.
    ///
    /// The chat log's last Local channel change wins; without one, the game
    /// log's last jump is used.
    fn seed(&mut self, character: &str, chat: Option<&Path>, game: Option<&Path>) {
        if let Some(path) = chat {
            let seeded = self
                .last_line(path, self.classifier.local_change_pattern())
                .and_then(|line| self.classifier.parse_local_change(&line));
            if let Some((timestamp, system)) = seeded {
                debug!(character = %character, system = %system, "Seeded location from chat log");
                self.apply_system_change(character, &system, timestamp);
                return;
            }
        }

        if let Some(path) = game {
            let seeded = self
                .last_line(path, self.classifier.jump_pattern())
                .and_then(|line| self.classifier.parse_jump(&line));
            if let Some((timestamp, _, system)) = seeded {
                debug!(character = %character, system = %system, "Seeded location from game log");
                self.apply_system_change(character, &system, timestamp);
            }
        }
    }

    fn last_line(&self, path: &Path, pattern: &regex::Regex) -> Option<String> {
        match find_last_matching_line(path, pattern, DEFAULT_TAIL_SIZE_BYTES) {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to scan log for seeding");
                None
            }
        }
    }

    fn attach_file(&mut self, path: PathBuf, character: String, source: LogSource) {
        let state = match FileWatchState::at_end(&path) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open log file");
                return;
            }
        };

        // Directory watches still report content changes if this fails
        if let Err(e) = self.watcher.watch_file(&path) {
            debug!(path = %path.display(), error = %e, "Failed to add file watch");
        }

        info!(
            character = %character,
            source = %source,
            path = %path.display(),
            "Watching log file"
        );
        self.files.insert(
            path,
            WatchedFile {
                character,
                source,
                state,
            },
        );
    }

    fn detach_file(&mut self, path: &Path) {
        self.debounce.cancel(path);
        if self.files.remove(path).is_some() {
            if let Err(e) = self.watcher.unwatch_file(path) {
                debug!(path = %path.display(), error = %e, "Failed to remove file watch");
            }
        }
    }

    fn on_file_changed(&mut self, path: &Path, now: Instant) {
        if !self.files.contains_key(path) {
            trace!(path = %path.display(), "Change for untracked file");
            return;
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Watched file unavailable, removing");
                self.detach_file(path);
                return;
            }
        };

        if let Some(file) = self.files.get_mut(path) {
            let decision = self.debounce.on_change(
                path,
                &mut file.state,
                metadata.len(),
                metadata.modified().ok(),
                now,
            );
            trace!(path = %path.display(), decision = ?decision, "Debounce decision");
        }
    }

    /// Schedules a tail for a watched file that has bytes past its offset,
    /// even if its metadata was already recorded.
    fn recheck_file(&mut self, path: &Path, now: Instant) {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Watched file unavailable, removing");
                self.detach_file(path);
                return;
            }
        };

        let Some(file) = self.files.get_mut(path) else {
            return;
        };
        file.state.last_size = metadata.len();
        file.state.last_modified = metadata.modified().ok();
        if metadata.len() != file.state.byte_offset {
            debug!(path = %path.display(), "Unread bytes found on rescan");
            self.debounce.schedule(path, now);
        }
    }

    fn tail_and_parse(&mut self, path: &Path, now: Instant) {
        let Some(file) = self.files.get(path) else {
            return;
        };
        let character = file.character.clone();
        let source = file.source;

        let read = match read_new_lines(path, &file.state) {
            Ok(read) => read,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read log file, removing");
                self.detach_file(path);
                return;
            }
        };

        if let Some(file) = self.files.get_mut(path) {
            file.state.byte_offset = read.new_offset;
        }

        debug!(
            path = %path.display(),
            line_count = read.lines.len(),
            "Processing new log lines"
        );
        for line in &read.lines {
            self.process_line(&character, source, line, now);
        }
    }

    fn process_line(&mut self, character: &str, source: LogSource, line: &str, now: Instant) {
        let options = ClassifyOptions {
            source,
            game_log_tailed: source == LogSource::Game,
        };
        let Some(event) = self.classifier.classify(line, options) else {
            return;
        };

        match event {
            LineEvent::SystemChanged {
                timestamp, system, ..
            } => self.apply_system_change(character, &system, timestamp),
            LineEvent::MiningPing => {
                let timeout = Duration::from_secs(self.active.mining_timeout_secs);
                if self.mining.ping(character, now, timeout) == MiningTransition::Started {
                    self.emit_combat(character, CombatEventType::MiningStarted, "Mining started".to_string());
                }
            }
            other => {
                if let (Some(kind), Some(text)) = (other.event_type(), other.display_text()) {
                    self.emit_combat(character, kind, text);
                }
            }
        }
    }

    fn apply_system_change(&mut self, character: &str, system: &str, timestamp: DateTime<Utc>) {
        if !self.locations.update(character, system, timestamp) {
            trace!(character = %character, system = %system, "System unchanged");
            return;
        }

        info!(character = %character, system = %system, "System changed");
        self.emit(MonitorEvent::SystemChanged {
            character: character.to_string(),
            system: system.to_string(),
        });
    }

    fn emit_combat(&self, character: &str, event_type: CombatEventType, display_text: String) {
        debug!(character = %character, event_type = %event_type, "Combat event detected");
        self.emit(MonitorEvent::CombatEventDetected {
            character: character.to_string(),
            event_type,
            display_text,
        });
    }

    fn emit(&self, event: MonitorEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
