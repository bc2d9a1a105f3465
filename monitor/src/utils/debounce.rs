//! Debounce scheduling for coalescing rapid file change notifications.
//!
//! The EVE client flushes log files in small bursts, and the platform watcher
//! reports each flush (sometimes more than once). The scheduler turns that
//! stream into at most one tail operation per burst:
//!
//! 1. A notification whose `(size, modified)` matches the stored state is a
//!    duplicate and is ignored
//! 2. The stored `(size, modified)` is always refreshed
//! 3. A file tailed less than [`MIN_PROCESS_INTERVAL`] ago drops the
//!    notification outright
//! 4. Otherwise a single-shot deadline [`DEBOUNCE_DELAY`] from now is created
//!    or pushed back
//!
//! The scheduler owns no timers. The engine sleeps until
//! [`DebounceScheduler::next_deadline`] and collects due paths with
//! [`DebounceScheduler::take_due`], which keeps everything on one thread and
//! lets tests drive time explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::trace;

use crate::tail::FileWatchState;

/// Delay between the last notification of a burst and the tail read.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(30);

/// Minimum time between two tail reads of the same file.
///
/// Notifications inside this window are dropped, not deferred.
pub const MIN_PROCESS_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of feeding one change notification to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Size and modification time are unchanged.
    Unchanged,
    /// The file was tailed too recently; nothing was scheduled.
    RateLimited,
    /// A new deadline was created.
    Scheduled,
    /// An existing deadline was pushed back.
    Rescheduled,
}

/// A file waiting for its debounce deadline.
#[derive(Debug)]
struct PendingTail {
    deadline: Instant,
}

/// Per-file debounce bookkeeping.
#[derive(Debug)]
pub struct DebounceScheduler {
    delay: Duration,
    min_interval: Duration,
    pending: HashMap<PathBuf, PendingTail>,
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceScheduler {
    /// Creates a scheduler with the standard 30ms delay and 50ms floor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: DEBOUNCE_DELAY,
            min_interval: MIN_PROCESS_INTERVAL,
            pending: HashMap::new(),
        }
    }

    /// Applies one change notification for `path`.
    ///
    /// `state` is the file's watch state; its size and modification time are
    /// updated in place.
    pub fn on_change(
        &mut self,
        path: &Path,
        state: &mut FileWatchState,
        size: u64,
        modified: Option<SystemTime>,
        now: Instant,
    ) -> DebounceDecision {
        if state.last_size == size && state.last_modified == modified {
            trace!(path = %path.display(), "Ignoring duplicate change notification");
            return DebounceDecision::Unchanged;
        }

        state.last_size = size;
        state.last_modified = modified;

        if let Some(last) = state.last_processed {
            if now.saturating_duration_since(last) < self.min_interval {
                trace!(path = %path.display(), "Dropping notification inside rate-limit window");
                return DebounceDecision::RateLimited;
            }
        }

        self.schedule(path, now)
    }

    /// Sets or pushes back the deadline for `path`, bypassing the duplicate
    /// check and the minimum interval.
    ///
    /// Used by the periodic rescan for files with unread bytes.
    pub fn schedule(&mut self, path: &Path, now: Instant) -> DebounceDecision {
        let deadline = now + self.delay;
        match self.pending.insert(path.to_path_buf(), PendingTail { deadline }) {
            Some(_) => {
                trace!(path = %path.display(), "Debounce deadline pushed back");
                DebounceDecision::Rescheduled
            }
            None => {
                trace!(path = %path.display(), "Debounce deadline set");
                DebounceDecision::Scheduled
            }
        }
    }

    /// Removes and returns every path whose deadline has passed, sorted.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &due {
            self.pending.remove(path);
        }

        due.sort();
        due
    }

    /// The earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Cancels the pending deadline for `path`, if any.
    pub fn cancel(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Cancels every pending deadline.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn path() -> PathBuf {
        PathBuf::from("/logs/Gamelogs/20240101_100000_123.txt")
    }

    #[test]
    fn test_unchanged_metadata_is_ignored() {
        let mut scheduler = DebounceScheduler::new();
        let modified = Some(SystemTime::UNIX_EPOCH + ms(1_000));
        let mut state = FileWatchState {
            last_size: 100,
            last_modified: modified,
            ..FileWatchState::default()
        };

        let decision = scheduler.on_change(&path(), &mut state, 100, modified, Instant::now());
        assert_eq!(decision, DebounceDecision::Unchanged);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_burst_collapses_into_one_tail() {
        let mut scheduler = DebounceScheduler::new();
        let mut state = FileWatchState::default();
        let start = Instant::now();

        // Five writes inside 30ms
        let mut decisions = Vec::new();
        for i in 0..5u64 {
            decisions.push(scheduler.on_change(
                &path(),
                &mut state,
                100 + i,
                None,
                start + ms(i * 5),
            ));
        }

        assert_eq!(decisions[0], DebounceDecision::Scheduled);
        assert!(decisions[1..]
            .iter()
            .all(|d| *d == DebounceDecision::Rescheduled));

        // Nothing before 30ms after the last notification
        assert!(scheduler.take_due(start + ms(40)).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(start + ms(50)));

        let due = scheduler.take_due(start + ms(50));
        assert_eq!(due, vec![path()]);
        assert!(scheduler.take_due(start + ms(500)).is_empty());
    }

    #[test]
    fn test_recently_processed_file_drops_notification() {
        let mut scheduler = DebounceScheduler::new();
        let start = Instant::now();
        let mut state = FileWatchState {
            last_processed: Some(start),
            ..FileWatchState::default()
        };

        let decision = scheduler.on_change(&path(), &mut state, 200, None, start + ms(20));
        assert_eq!(decision, DebounceDecision::RateLimited);
        assert!(!scheduler.is_pending(&path()));

        // Metadata is recorded even though the notification was dropped
        assert_eq!(state.last_size, 200);

        // The same metadata reported again later is now a duplicate
        let decision = scheduler.on_change(&path(), &mut state, 200, None, start + ms(80));
        assert_eq!(decision, DebounceDecision::Unchanged);
    }

    #[test]
    fn test_notification_after_floor_is_scheduled() {
        let mut scheduler = DebounceScheduler::new();
        let start = Instant::now();
        let mut state = FileWatchState {
            last_processed: Some(start),
            ..FileWatchState::default()
        };

        let decision = scheduler.on_change(&path(), &mut state, 300, None, start + ms(50));
        assert_eq!(decision, DebounceDecision::Scheduled);
    }

    #[test]
    fn test_schedule_ignores_floor_and_duplicates() {
        let mut scheduler = DebounceScheduler::new();
        let start = Instant::now();
        let mut state = FileWatchState {
            last_processed: Some(start),
            ..FileWatchState::default()
        };

        assert_eq!(
            scheduler.on_change(&path(), &mut state, 200, None, start + ms(10)),
            DebounceDecision::RateLimited
        );
        assert_eq!(
            scheduler.schedule(&path(), start + ms(20)),
            DebounceDecision::Scheduled
        );
        assert_eq!(scheduler.take_due(start + ms(50)), vec![path()]);
    }

    #[test]
    fn test_files_are_independent() {
        let mut scheduler = DebounceScheduler::new();
        let start = Instant::now();
        let other = PathBuf::from("/logs/Chatlogs/Local_1.txt");
        let mut state_a = FileWatchState::default();
        let mut state_b = FileWatchState::default();

        scheduler.on_change(&path(), &mut state_a, 1, None, start);
        scheduler.on_change(&other, &mut state_b, 1, None, start + ms(20));

        assert_eq!(scheduler.take_due(start + ms(30)), vec![path()]);
        assert_eq!(scheduler.take_due(start + ms(50)), vec![other]);
    }

    #[test]
    fn test_cancel_and_clear() {
        let mut scheduler = DebounceScheduler::new();
        let start = Instant::now();
        let mut state = FileWatchState::default();

        scheduler.on_change(&path(), &mut state, 1, None, start);
        scheduler.cancel(&path());
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.on_change(&path(), &mut state, 2, None, start);
        scheduler.clear();
        assert_eq!(scheduler.pending_count(), 0);
    }
}
