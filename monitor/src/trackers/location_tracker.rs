//! Last known solar system per character.
//!
//! Seeding, rescans, and re-reads after rotation can all report a system the
//! character is already in. [`LocationTracker::update`] reports whether the
//! system actually changed so the engine only emits real moves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::CharacterLocation;

/// Character locations keyed by lowercased character name.
#[derive(Debug, Default)]
pub struct LocationTracker {
    locations: HashMap<String, CharacterLocation>,
}

impl LocationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `character` is in `system` as of `timestamp`.
    ///
    /// Returns `false` without touching the entry when the character is
    /// already known to be in `system`.
    pub fn update(&mut self, character: &str, system: &str, timestamp: DateTime<Utc>) -> bool {
        let key = character.to_lowercase();
        if self
            .locations
            .get(&key)
            .is_some_and(|loc| loc.system_name == system)
        {
            return false;
        }

        self.locations.insert(
            key,
            CharacterLocation {
                character_name: character.to_string(),
                system_name: system.to_string(),
                last_update: timestamp,
            },
        );
        true
    }

    /// The character's last known system.
    #[must_use]
    pub fn current_system(&self, character: &str) -> Option<&str> {
        self.get(character).map(|loc| loc.system_name.as_str())
    }

    #[must_use]
    pub fn get(&self, character: &str) -> Option<&CharacterLocation> {
        self.locations.get(&character.to_lowercase())
    }

    pub fn clear(&mut self) {
        self.locations.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locations.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
