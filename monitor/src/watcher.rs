//! File system watching for EVE log directories and files.
//!
//! The engine only needs two kinds of signal:
//!
//! - [`WatchNotification::DirectoryChanged`]: an entry in a watched directory
//!   was created, removed, or renamed, so listener maps may be stale
//! - [`WatchNotification::FileChanged`]: a file's content changed and may
//!   have new lines
//!
//! [`LogWatcher`] abstracts the platform primitive. [`NotifyWatcher`] is backed
//! by the `notify` crate; [`NullWatcher`] reports nothing and leaves the
//! engine to its periodic rescan.
//!
//! # Architecture
//!
//! The notify callback runs on notify's own thread. It is kept lightweight: it
//! classifies the event, then hands a notification to the engine through a
//! bounded Tokio channel with `try_send`. If the channel is full the
//! notification is dropped with a warning; the periodic rescan covers the gap.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{
    event::ModifyKind,
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Capacity of the channel between the notify thread and the engine.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// A change reported by a [`LogWatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchNotification {
    /// An entry was added to, removed from, or renamed within this directory.
    DirectoryChanged(PathBuf),
    /// This file's content changed.
    FileChanged(PathBuf),
}

/// Errors that can occur during file watching operations.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    Init(#[from] notify::Error),

    /// Failed to add or remove a watch.
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Platform file watching, as seen by the engine.
pub trait LogWatcher: Send {
    /// Starts reporting entry changes in `path` (non-recursive).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watch cannot be added.
    fn watch_directory(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Stops reporting changes for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watch cannot be removed.
    fn unwatch_directory(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Starts reporting content changes of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watch cannot be added.
    fn watch_file(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Stops reporting content changes of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watch cannot be removed.
    fn unwatch_file(&mut self, path: &Path) -> Result<(), WatcherError>;
}

/// [`LogWatcher`] backed by the platform's native notification API.
pub struct NotifyWatcher {
    /// Kept alive to maintain the watch subscriptions.
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl NotifyWatcher {
    /// Creates a watcher that reports into `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be initialized.
    pub fn new(sender: mpsc::Sender<WatchNotification>) -> Result<Self, WatcherError> {
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                handle_notify_event(res, &sender);
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher,
            watched: HashSet::new(),
        })
    }

    fn add(&mut self, path: &Path) -> Result<(), WatcherError> {
        if self.watched.contains(path) {
            return Ok(());
        }
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatcherError::Watch {
                path: path.to_path_buf(),
                source,
            })?;
        self.watched.insert(path.to_path_buf());
        debug!(path = %path.display(), "Started watching");
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), WatcherError> {
        if !self.watched.remove(path) {
            return Ok(());
        }
        self.watcher
            .unwatch(path)
            .map_err(|source| WatcherError::Watch {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "Stopped watching");
        Ok(())
    }
}

impl LogWatcher for NotifyWatcher {
    fn watch_directory(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.add(path)
    }

    fn unwatch_directory(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.remove(path)
    }

    fn watch_file(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.add(path)
    }

    fn unwatch_file(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.remove(path)
    }
}

/// [`LogWatcher`] that never reports anything.
///
/// Used when the platform watcher is unavailable; only the periodic rescan
/// then notices new files.
#[derive(Debug, Default)]
pub struct NullWatcher;

impl LogWatcher for NullWatcher {
    fn watch_directory(&mut self, _path: &Path) -> Result<(), WatcherError> {
        Ok(())
    }

    fn unwatch_directory(&mut self, _path: &Path) -> Result<(), WatcherError> {
        Ok(())
    }

    fn watch_file(&mut self, _path: &Path) -> Result<(), WatcherError> {
        Ok(())
    }

    fn unwatch_file(&mut self, _path: &Path) -> Result<(), WatcherError> {
        Ok(())
    }
}

/// Maps a notify event to the notifications the engine cares about.
fn classify_event(event: &Event) -> Vec<WatchNotification> {
    let directory_of = |path: &PathBuf| {
        path.parent()
            .map(|parent| WatchNotification::DirectoryChanged(parent.to_path_buf()))
    };

    match event.kind {
        EventKind::Create(_)
        | EventKind::Remove(_)
        | EventKind::Modify(ModifyKind::Name(_)) => {
            event.paths.iter().filter_map(directory_of).collect()
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Metadata(_)) => event
            .paths
            .iter()
            .map(|path| WatchNotification::FileChanged(path.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Handles events from the notify crate.
fn handle_notify_event(
    res: Result<Event, notify::Error>,
    sender: &mpsc::Sender<WatchNotification>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for notification in classify_event(&event) {
        if let Err(e) = sender.try_send(notification) {
            warn!(error = %e, "Failed to queue watch notification, channel may be full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_create_and_remove_are_directory_changes() {
        let created = event(
            EventKind::Create(CreateKind::File),
            "/logs/Chatlogs/Local_1.txt",
        );
        assert_eq!(
            classify_event(&created),
            vec![WatchNotification::DirectoryChanged(PathBuf::from("/logs/Chatlogs"))]
        );

        let removed = event(
            EventKind::Remove(RemoveKind::File),
            "/logs/Gamelogs/1.txt",
        );
        assert_eq!(
            classify_event(&removed),
            vec![WatchNotification::DirectoryChanged(PathBuf::from("/logs/Gamelogs"))]
        );
    }

    #[test]
    fn test_rename_is_directory_change() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/logs/Gamelogs/2.txt",
        );
        assert_eq!(
            classify_event(&renamed),
            vec![WatchNotification::DirectoryChanged(PathBuf::from("/logs/Gamelogs"))]
        );
    }

    #[test]
    fn test_data_change_is_file_change() {
        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/logs/Gamelogs/1.txt",
        );
        assert_eq!(
            classify_event(&modified),
            vec![WatchNotification::FileChanged(PathBuf::from("/logs/Gamelogs/1.txt"))]
        );
    }

    #[test]
    fn test_access_events_are_ignored() {
        let accessed = event(EventKind::Access(notify::event::AccessKind::Any), "/logs/1.txt");
        assert!(classify_event(&accessed).is_empty());
    }

    #[test]
    fn test_full_channel_drops_notification() {
        let (tx, mut rx) = mpsc::channel(1);
        let modified = event(EventKind::Modify(ModifyKind::Any), "/logs/1.txt");

        handle_notify_event(Ok(modified.clone()), &tx);
        handle_notify_event(Ok(modified), &tx);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_null_watcher_accepts_everything() {
        let mut watcher = NullWatcher;
        assert!(watcher.watch_directory(Path::new("/nonexistent")).is_ok());
        assert!(watcher.unwatch_file(Path::new("/nonexistent/1.txt")).is_ok());
    }

    #[tokio::test]
    async fn test_notify_watcher_reports_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watcher = NotifyWatcher::new(tx).unwrap();
        watcher.watch_directory(temp_dir.path()).unwrap();

        std::fs::write(temp_dir.path().join("Local_1.txt"), b"hello\n").unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should report within timeout")
            .unwrap();
        let (WatchNotification::DirectoryChanged(path) | WatchNotification::FileChanged(path)) =
            notification;
        assert!(path.starts_with(temp_dir.path()));
    }

    #[test]
    fn test_watch_missing_path_fails() {
        let (tx, _rx) = mpsc::channel(8);
        let mut watcher = NotifyWatcher::new(tx).unwrap();
        let err = watcher
            .watch_directory(Path::new("/nonexistent/eve/logs"))
            .unwrap_err();
        assert!(matches!(err, WatcherError::Watch { .. }));
        assert!(err.to_string().contains("/nonexistent/eve/logs"));
    }
}
