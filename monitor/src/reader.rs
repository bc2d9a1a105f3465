//! Thread-safe handle to the monitoring engine.
//!
//! [`LogReader`] is what the UI thread holds. Every method returns
//! immediately: settings are written under a small lock and a
//! [`Command`](crate::engine::Command) is posted to the engine thread, which
//! executes commands strictly in the order they were posted.
//!
//! # Threads
//!
//! - `eve-log-engine` runs the [`Engine`] loop on a current-thread Tokio
//!   runtime and does all file I/O
//! - `eve-log-relay` receives engine events, updates the reader's
//!   last-known-system cache, then forwards them to the subscriber
//!
//! Dropping the reader shuts the engine down and joins both threads.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eve_log_monitor::config::MonitorConfig;
//! use eve_log_monitor::reader::LogReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(MonitorConfig::from_env()?);
//! let (reader, mut events) = LogReader::spawn(config)?;
//! reader.set_characters(["Jane Doe"])?;
//! reader.start()?;
//!
//! while let Some(event) = events.blocking_recv() {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::config::{snapshot, update_settings, ConfigProvider, SharedSettings, SharedSettingsHandle};
use crate::engine::{Command, Engine};
use crate::error::{MonitorError, Result};
use crate::trackers::mining_tracker::clamp_timeout_secs;
use crate::types::MonitorEvent;
use crate::watcher::{LogWatcher, NotifyWatcher, NullWatcher, WATCH_CHANNEL_CAPACITY};

/// Last known system per lowercased character name.
type SystemCache = Arc<Mutex<HashMap<String, String>>>;

/// Caller-side handle to a running engine thread.
pub struct LogReader {
    provider: Arc<dyn ConfigProvider>,
    settings: SharedSettingsHandle,
    commands: mpsc::UnboundedSender<Command>,
    systems: SystemCache,
    engine_thread: Option<JoinHandle<()>>,
    relay_thread: Option<JoinHandle<()>>,
}

impl LogReader {
    /// Spawns the engine and returns the handle plus the event stream.
    ///
    /// The engine starts stopped; call [`LogReader::start`] once the tracked
    /// characters are set. A platform watcher that fails to initialize is
    /// replaced by [`NullWatcher`], leaving discovery to the periodic rescan.
    ///
    /// # Errors
    ///
    /// Returns an error if a log pattern fails to compile or a thread cannot
    /// be spawned.
    pub fn spawn(
        provider: Arc<dyn ConfigProvider>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MonitorEvent>)> {
        let settings: SharedSettingsHandle =
            Arc::new(Mutex::new(SharedSettings::from_provider(provider.as_ref())));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notification_tx, notification_rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (subscriber_tx, subscriber_rx) = mpsc::unbounded_channel();

        let watcher: Box<dyn LogWatcher> = match NotifyWatcher::new(notification_tx) {
            Ok(watcher) => Box::new(watcher),
            Err(e) => {
                warn!(error = %e, "Native file watching unavailable, relying on periodic rescan");
                Box::new(NullWatcher)
            }
        };

        let engine = Engine::new(Arc::clone(&settings), watcher, engine_tx)?;

        let engine_thread = thread::Builder::new()
            .name("eve-log-engine".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Failed to create engine runtime");
                        return;
                    }
                };
                runtime.block_on(engine.run(command_rx, notification_rx));
            })?;

        let systems: SystemCache = Arc::new(Mutex::new(HashMap::new()));
        let relay_systems = Arc::clone(&systems);
        let relay_thread = thread::Builder::new()
            .name("eve-log-relay".to_string())
            .spawn(move || relay_events(engine_rx, &relay_systems, &subscriber_tx))?;

        debug!("Log reader spawned");

        Ok((
            Self {
                provider,
                settings,
                commands: command_tx,
                systems,
                engine_thread: Some(engine_thread),
                relay_thread: Some(relay_thread),
            },
            subscriber_rx,
        ))
    }

    /// Starts monitoring. A no-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn start(&self) -> Result<()> {
        self.post(Command::Start)
    }

    /// Stops monitoring and discards all engine state. A no-op if stopped.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn stop(&self) -> Result<()> {
        self.post(Command::Stop)
    }

    /// Re-applies directories and enable flags without a full restart.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn refresh(&self) -> Result<()> {
        self.post(Command::Refresh)
    }

    /// Replaces the tracked character list.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn set_characters<I, S>(&self, characters: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let characters: Vec<String> = characters.into_iter().map(Into::into).collect();
        update_settings(&self.settings, |s| s.characters = characters);
        self.post(Command::CharactersChanged)
    }

    /// Points the engine at new chat and game log directories.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn set_directories(&self, chat_log_dir: PathBuf, game_log_dir: PathBuf) -> Result<()> {
        update_settings(&self.settings, |s| {
            s.chat_log_dir = chat_log_dir;
            s.game_log_dir = game_log_dir;
        });
        self.post(Command::DirectoriesChanged)
    }

    /// Enables or disables chat and game log monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn set_enable_flags(&self, chat_log_enabled: bool, game_log_enabled: bool) -> Result<()> {
        update_settings(&self.settings, |s| {
            s.chat_log_enabled = chat_log_enabled;
            s.game_log_enabled = game_log_enabled;
        });
        self.post(Command::EnableFlagsChanged)
    }

    /// Sets the mining inactivity timeout, clamped to 15-120 seconds.
    ///
    /// Sessions already in progress keep their current deadline until the
    /// next ping.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn set_mining_timeout(&self, secs: u64) -> Result<()> {
        let secs = clamp_timeout_secs(secs);
        update_settings(&self.settings, |s| s.mining_timeout_secs = secs);
        self.post(Command::SettingsChanged)
    }

    /// Re-reads every provider-backed setting, keeping the character list.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::EngineUnavailable`] if the engine has exited.
    pub fn reload_config(&self) -> Result<()> {
        update_settings(&self.settings, |s| s.reload(self.provider.as_ref()));
        self.post(Command::SettingsChanged)
    }

    /// Last system reported for `character`, ignoring case.
    #[must_use]
    pub fn current_system(&self, character: &str) -> Option<String> {
        self.systems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&character.to_lowercase())
            .cloned()
    }

    /// Every last known system, keyed by lowercased character name.
    #[must_use]
    pub fn known_systems(&self) -> HashMap<String, String> {
        self.systems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current settings as the engine will see them.
    #[must_use]
    pub fn settings(&self) -> SharedSettings {
        snapshot(&self.settings)
    }

    fn post(&self, command: Command) -> Result<()> {
        trace!(command = ?command, "Posting command");
        self.commands
            .send(command)
            .map_err(|_| MonitorError::EngineUnavailable)
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        // Ignored: the engine may already have exited
        let _ = self.commands.send(Command::Shutdown);

        for (name, handle) in [
            ("engine", self.engine_thread.take()),
            ("relay", self.relay_thread.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(thread = name, "Log reader thread panicked");
                }
            }
        }
        debug!("Log reader shut down");
    }
}

/// Updates the cache for each engine event, then forwards it.
///
/// Runs until the engine drops its event sender.
fn relay_events(
    mut events: mpsc::UnboundedReceiver<MonitorEvent>,
    systems: &SystemCache,
    subscriber: &mpsc::UnboundedSender<MonitorEvent>,
) {
    while let Some(event) = events.blocking_recv() {
        if let MonitorEvent::SystemChanged { character, system } = &event {
            systems
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(character.to_lowercase(), system.clone());
        }

        if subscriber.send(event).is_err() {
            trace!("Event subscriber dropped");
        }
    }
}
