//! Mining session tracking per character.
//!
//! The game log reports each completed mining cycle as a `(mining)` line but
//! never says when mining stops. A session is therefore inferred:
//!
//! - `Idle` + ping: the session starts ([`MiningTransition::Started`]) and a
//!   timeout is armed
//! - `Active` + ping: the timeout is re-armed ([`MiningTransition::Extended`])
//! - `Active` + timeout: the session stops and the character returns to `Idle`
//!
//! Nothing happens to an `Idle` character except on a ping. Characters are
//! independent of each other.
//!
//! Like the debounce scheduler, the tracker holds deadlines instead of timers;
//! the engine sleeps until [`MiningSessionTracker::next_deadline`] and calls
//! [`MiningSessionTracker::expire`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Default mining inactivity timeout in seconds.
pub const DEFAULT_MINING_TIMEOUT_SECS: u64 = 30;

/// Shortest accepted mining timeout in seconds.
pub const MIN_MINING_TIMEOUT_SECS: u64 = 15;

/// Longest accepted mining timeout in seconds.
pub const MAX_MINING_TIMEOUT_SECS: u64 = 120;

/// Clamps a configured timeout into the accepted range.
#[must_use]
pub fn clamp_timeout_secs(secs: u64) -> u64 {
    secs.clamp(MIN_MINING_TIMEOUT_SECS, MAX_MINING_TIMEOUT_SECS)
}

/// Mining state of one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MiningPhase {
    #[default]
    Idle,
    Active,
}

/// Result of a mining ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningTransition {
    /// The character was idle; a session started.
    Started,
    /// The character was already mining; the timeout was pushed back.
    Extended,
}

#[derive(Debug, Default)]
struct MiningState {
    phase: MiningPhase,
    deadline: Option<Instant>,
}

/// Tracks mining sessions for every character that has ever pinged.
#[derive(Debug, Default)]
pub struct MiningSessionTracker {
    states: HashMap<String, MiningState>,
}

impl MiningSessionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a mining ping for `character` at `now`.
    pub fn ping(&mut self, character: &str, now: Instant, timeout: Duration) -> MiningTransition {
        let state = self.states.entry(character.to_string()).or_default();
        state.deadline = Some(now + timeout);

        match state.phase {
            MiningPhase::Idle => {
                state.phase = MiningPhase::Active;
                debug!(character = %character, "Mining session started");
                MiningTransition::Started
            }
            MiningPhase::Active => MiningTransition::Extended,
        }
    }

    /// Ends every session whose timeout has passed.
    ///
    /// Returns the characters that stopped mining, sorted.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut stopped: Vec<String> = self
            .states
            .iter_mut()
            .filter(|(_, state)| {
                state.phase == MiningPhase::Active && state.deadline.is_some_and(|d| d <= now)
            })
            .map(|(character, state)| {
                state.phase = MiningPhase::Idle;
                state.deadline = None;
                character.clone()
            })
            .collect();

        stopped.sort();
        for character in &stopped {
            debug!(character = %character, "Mining session timed out");
        }
        stopped
    }

    /// The earliest timeout among active sessions.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter(|s| s.phase == MiningPhase::Active)
            .filter_map(|s| s.deadline)
            .min()
    }

    /// Current phase of `character`; unknown characters are idle.
    #[must_use]
    pub fn phase(&self, character: &str) -> MiningPhase {
        self.states
            .get(character)
            .map_or(MiningPhase::Idle, |s| s.phase)
    }

    /// Drops every character for which `keep` returns false, cancelling its
    /// session without a stop transition.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.states.retain(|character, _| keep(character));
    }

    /// Forgets every character and cancels every timeout.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
