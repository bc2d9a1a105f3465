//! Event types for EVE log monitoring.
//!
//! This module defines the events the engine emits to the façade and the
//! small value types shared between modules. Events serialize to JSON with a
//! `type` tag so the CLI can print them as JSON lines.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which EVE client log stream a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// `Local_*.txt` chat channel logs.
    Chat,
    /// Combat/notification game logs.
    Game,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Game => write!(f, "game"),
        }
    }
}

/// Classification of non-location game events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatEventType {
    FleetInvite,
    FollowWarp,
    Regroup,
    Compression,
    Decloak,
    MiningStarted,
    MiningStopped,
}

impl CombatEventType {
    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FleetInvite => "fleet_invite",
            Self::FollowWarp => "follow_warp",
            Self::Regroup => "regroup",
            Self::Compression => "compression",
            Self::Decloak => "decloak",
            Self::MiningStarted => "mining_started",
            Self::MiningStopped => "mining_stopped",
        }
    }
}

impl fmt::Display for CombatEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events produced by the monitor engine.
///
/// Uses serde's internally tagged representation for clean JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A tracked character is now in a different solar system.
    SystemChanged { character: String, system: String },

    /// A notable game event for a tracked character.
    CombatEventDetected {
        character: String,
        #[serde(rename = "eventType")]
        event_type: CombatEventType,
        #[serde(rename = "displayText")]
        display_text: String,
    },

    /// Reserved; the engine does not emit login detection yet.
    CharacterLoggedIn { character: String },

    /// Reserved; the engine does not emit logout detection yet.
    CharacterLoggedOut { character: String },
}

impl MonitorEvent {
    /// The character this event concerns.
    #[must_use]
    pub fn character(&self) -> &str {
        match self {
            Self::SystemChanged { character, .. }
            | Self::CombatEventDetected { character, .. }
            | Self::CharacterLoggedIn { character }
            | Self::CharacterLoggedOut { character } => character,
        }
    }
}

/// The last known solar system of a tracked character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterLocation {
    pub character_name: String,
    pub system_name: String,
    /// Timestamp of the log line that reported the system.
    pub last_update: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn system_changed_serializes_with_type_tag() {
        let event = MonitorEvent::SystemChanged {
            character: "Jane Doe".to_string(),
            system: "Jita".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "system_changed");
        assert_eq!(json["character"], "Jane Doe");
        assert_eq!(json["system"], "Jita");
    }

    #[test]
    fn combat_event_serializes_camel_case_fields() {
        let event = MonitorEvent::CombatEventDetected {
            character: "Jane Doe".to_string(),
            event_type: CombatEventType::FollowWarp,
            display_text: "Following John Roe in warp".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "combat_event_detected");
        assert_eq!(json["eventType"], "follow_warp");
        assert_eq!(json["displayText"], "Following John Roe in warp");
    }

    #[test]
    fn event_type_wire_names_match_serde() {
        for kind in [
            CombatEventType::FleetInvite,
            CombatEventType::FollowWarp,
            CombatEventType::Regroup,
            CombatEventType::Compression,
            CombatEventType::Decloak,
            CombatEventType::MiningStarted,
            CombatEventType::MiningStopped,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }

    #[test]
    fn character_accessor() {
        let event = MonitorEvent::CharacterLoggedOut {
            character: "John Roe".to_string(),
        };
        assert_eq!(event.character(), "John Roe");
    }

    #[test]
    fn character_location_round_trips() {
        let location = CharacterLocation {
            character_name: "Jane Doe".to_string(),
            system_name: "Perimeter".to_string(),
            last_update: Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap(),
        };

        let json = serde_json::to_string(&location).unwrap();
        assert!(json.contains("\"systemName\":\"Perimeter\""));

        let parsed: CharacterLocation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, location);
    }

    #[test]
    fn log_source_display() {
        assert_eq!(LogSource::Chat.to_string(), "chat");
        assert_eq!(LogSource::Game.to_string(), "game");
    }
}
