//! EVE log line classification.
//!
//! Turns one line of a chat or game log into at most one [`LineEvent`]. The
//! classifier holds only compiled patterns, so the same line always yields the
//! same event regardless of what was classified before it.
//!
//! # Line Format
//!
//! Body lines look like `[ 2024.01.01 10:05:00 ] (notify) free text`. The
//! timestamp is EVE time, which is UTC; the bracket may or may not carry
//! padding spaces.
//!
//! # Event Mapping
//!
//! Checks run in this order and the first hit wins:
//!
//! | Trigger | Event |
//! |---------|-------|
//! | `EVE System` (chat log, no game log tailed) | [`LineEvent::SystemChanged`] |
//! | `(question)` fleet invite | [`LineEvent::FleetInvite`] |
//! | `(notify)` + `Following` | [`LineEvent::FollowWarp`] |
//! | `(notify)` + `Regrouping` | [`LineEvent::Regroup`] |
//! | `(notify)` + `compressed` | [`LineEvent::Compression`] |
//! | `(notify)` + `cloak deactivates` | [`LineEvent::Decloak`] |
//! | `(mining)` | [`LineEvent::MiningPing`] |
//! | `(None)` + `Jumping` | [`LineEvent::SystemChanged`] |

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::error::PatternError;
use crate::types::{CombatEventType, LogSource};

/// Shortest normalized line worth classifying.
pub const MIN_LINE_CHARS: usize = 25;

/// Longest normalized line worth classifying.
pub const MAX_LINE_CHARS: usize = 1000;

/// Timestamp layout inside the leading bracket.
const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// A structured event extracted from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// The character arrived in `system`.
    ///
    /// `from` is only known for game-log jumps.
    SystemChanged {
        timestamp: DateTime<Utc>,
        from: Option<String>,
        system: String,
    },
    FleetInvite {
        inviter: String,
    },
    FollowWarp {
        leader: String,
    },
    Regroup {
        leader: String,
    },
    Compression {
        count: u64,
        item: String,
    },
    Decloak {
        source: String,
    },
    /// A mining cycle reported yield; drives the mining session tracker.
    MiningPing,
}

impl LineEvent {
    /// Event type reported for this line, if it maps to one directly.
    ///
    /// Location changes and mining pings are handled by the engine and have
    /// no direct combat event type.
    #[must_use]
    pub const fn event_type(&self) -> Option<CombatEventType> {
        match self {
            Self::FleetInvite { .. } => Some(CombatEventType::FleetInvite),
            Self::FollowWarp { .. } => Some(CombatEventType::FollowWarp),
            Self::Regroup { .. } => Some(CombatEventType::Regroup),
            Self::Compression { .. } => Some(CombatEventType::Compression),
            Self::Decloak { .. } => Some(CombatEventType::Decloak),
            Self::SystemChanged { .. } | Self::MiningPing => None,
        }
    }

    /// Human-readable description, for events that have one.
    #[must_use]
    pub fn display_text(&self) -> Option<String> {
        match self {
            Self::FleetInvite { inviter } => Some(format!("Fleet invite from {inviter}")),
            Self::FollowWarp { leader } => Some(format!("Following {leader} in warp")),
            Self::Regroup { leader } => Some(format!("Regrouping to {leader}")),
            Self::Compression { count, item } => Some(format!("Compressed {count} {item}")),
            Self::Decloak { source } => Some(format!("Cloak disrupted by {source}")),
            Self::SystemChanged { .. } | Self::MiningPing => None,
        }
    }
}

/// Context the classifier needs about where a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub source: LogSource,
    /// Whether a game log is tailed for the same character. Local channel
    /// changes in chat logs are then left to the game log's jump lines.
    pub game_log_tailed: bool,
}

/// Compiled patterns for classifying log lines.
#[derive(Debug)]
pub struct LineClassifier {
    timestamp: Regex,
    local_change: Regex,
    fleet_invite: Regex,
    follow_warp: Regex,
    regroup: Regex,
    compression: Regex,
    decloak: Regex,
    jump: Regex,
    // Normalization steps are skipped when their pattern is unavailable
    markup: Option<Regex>,
    whitespace: Option<Regex>,
}

impl LineClassifier {
    /// Compiles every pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if a classification pattern fails to compile.
    pub fn new() -> Result<Self, PatternError> {
        Ok(Self {
            timestamp: compile(
                "timestamp",
                r"^\[\s*(\d{4}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2})\s*\]",
            )?,
            local_change: compile("local change", r"Channel changed to Local\s*:\s*(.+)")?,
            fleet_invite: compile(
                "fleet invite",
                r"\(question\)\s*(.+?) wants you to join their fleet",
            )?,
            follow_warp: compile("follow warp", r"Following (.+?) in warp")?,
            regroup: compile("regroup", r"Regrouping to (.+?)(?:\.|$)")?,
            compression: compile("compression", r"compressed (.+?) into (\d+) (.+)")?,
            decloak: compile("decloak", r"proximity to (?:a nearby )?(.+?)\.")?,
            jump: compile("jump", r"Jumping from (.+?) to (.+)")?,
            markup: optional_pattern("markup", r"<[^>]*>"),
            whitespace: optional_pattern("whitespace", r"\s+"),
        })
    }

    /// Pattern matching a Local channel change line, for seeding.
    #[must_use]
    pub const fn local_change_pattern(&self) -> &Regex {
        &self.local_change
    }

    /// Pattern matching a jump line, for seeding.
    #[must_use]
    pub const fn jump_pattern(&self) -> &Regex {
        &self.jump
    }

    /// Classifies one raw log line.
    #[must_use]
    pub fn classify(&self, raw: &str, options: ClassifyOptions) -> Option<LineEvent> {
        let line = normalize_line(raw);
        let length = line.chars().count();
        if !(MIN_LINE_CHARS..=MAX_LINE_CHARS).contains(&length) {
            return None;
        }
        let line = line.as_str();

        if options.source == LogSource::Chat
            && !options.game_log_tailed
            && line.contains("EVE System")
        {
            if let Some(event) = self.local_change_event(line) {
                return Some(event);
            }
        }

        if line.contains("(question)") {
            if let Some(inviter) = self.capture_name(&self.fleet_invite, line, 1) {
                return Some(LineEvent::FleetInvite { inviter });
            }
        }

        if line.contains("(notify)") {
            if let Some(event) = self.notify_event(line) {
                return Some(event);
            }
        }

        if line.contains("(mining)") {
            return Some(LineEvent::MiningPing);
        }

        if line.contains("(None)") && line.contains("Jumping") {
            return self.jump_event(line);
        }

        None
    }

    /// Parses a Local channel change line into its timestamp and system.
    #[must_use]
    pub fn parse_local_change(&self, raw: &str) -> Option<(DateTime<Utc>, String)> {
        match self.local_change_event(&normalize_line(raw))? {
            LineEvent::SystemChanged {
                timestamp, system, ..
            } => Some((timestamp, system)),
            _ => None,
        }
    }

    /// Parses a jump line into its timestamp, origin, and destination.
    #[must_use]
    pub fn parse_jump(&self, raw: &str) -> Option<(DateTime<Utc>, String, String)> {
        match self.jump_event(&normalize_line(raw))? {
            LineEvent::SystemChanged {
                timestamp,
                from,
                system,
            } => Some((timestamp, from.unwrap_or_default(), system)),
            _ => None,
        }
    }

    /// Cleans an extracted name.
    ///
    /// Strips markup, collapses whitespace runs, trims, and drops one
    /// trailing `.` or `,`.
    #[must_use]
    pub fn sanitize_name(&self, raw: &str) -> String {
        let mut name = raw.to_string();
        if let Some(markup) = &self.markup {
            name = markup.replace_all(&name, "").into_owned();
        }
        if let Some(whitespace) = &self.whitespace {
            name = whitespace.replace_all(&name, " ").into_owned();
        }

        let trimmed = name.trim();
        let trimmed = trimmed
            .strip_suffix('.')
            .or_else(|| trimmed.strip_suffix(','))
            .unwrap_or(trimmed);
        trimmed.trim_end().to_string()
    }

    /// Parses the leading timestamp, falling back to the current time.
    #[must_use]
    pub fn parse_timestamp(&self, line: &str) -> DateTime<Utc> {
        self.timestamp
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), TIMESTAMP_FORMAT).ok())
            .map_or_else(Utc::now, |naive| naive.and_utc())
    }

    fn local_change_event(&self, line: &str) -> Option<LineEvent> {
        let system = self.capture_name(&self.local_change, line, 1)?;
        Some(LineEvent::SystemChanged {
            timestamp: self.parse_timestamp(line),
            from: None,
            system,
        })
    }

    fn jump_event(&self, line: &str) -> Option<LineEvent> {
        let caps = self.jump.captures(line)?;
        let from = self.sanitize_name(caps.get(1)?.as_str());
        let system = self.sanitize_name(caps.get(2)?.as_str());
        if system.is_empty() {
            return None;
        }
        Some(LineEvent::SystemChanged {
            timestamp: self.parse_timestamp(line),
            from: Some(from).filter(|f| !f.is_empty()),
            system,
        })
    }

    fn notify_event(&self, line: &str) -> Option<LineEvent> {
        if line.contains("Following") {
            if let Some(leader) = self.capture_name(&self.follow_warp, line, 1) {
                return Some(LineEvent::FollowWarp { leader });
            }
        }

        if line.contains("Regrouping") {
            if let Some(leader) = self.capture_name(&self.regroup, line, 1) {
                return Some(LineEvent::Regroup { leader });
            }
        }

        if line.contains("compressed") {
            if let Some(caps) = self.compression.captures(line) {
                let count = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
                let item = caps.get(3).map(|m| self.sanitize_name(m.as_str()));
                if let (Some(count), Some(item)) = (count, item) {
                    if !item.is_empty() {
                        return Some(LineEvent::Compression { count, item });
                    }
                }
            }
        }

        if line.contains("cloak deactivates") {
            if let Some(source) = self.capture_name(&self.decloak, line, 1) {
                return Some(LineEvent::Decloak { source });
            }
        }

        None
    }

    fn capture_name(&self, pattern: &Regex, line: &str, group: usize) -> Option<String> {
        let raw = pattern.captures(line)?.get(group)?.as_str();
        let name = self.sanitize_name(raw);
        (!name.is_empty()).then_some(name)
    }
}

/// Strips control characters and zero-width marks, then trims.
#[must_use]
pub fn normalize_line(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !is_invisible(*c)).collect();
    cleaned.trim().to_string()
}

const fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{0000}'..='\u{001F}' | '\u{007F}' | '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}'
    )
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|e| PatternError::invalid(name, e))
}

fn optional_pattern(name: &'static str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern = name, error = %e, "Normalization pattern unavailable, skipping step");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const GAME: ClassifyOptions = ClassifyOptions {
        source: LogSource::Game,
        game_log_tailed: true,
    };

    const CHAT_ONLY: ClassifyOptions = ClassifyOptions {
        source: LogSource::Chat,
        game_log_tailed: false,
    };

    fn classifier() -> LineClassifier {
        LineClassifier::new().expect("patterns compile")
    }

    #[test]
    fn jump_line_yields_system_change_with_timestamp() {
        let event = classifier()
            .classify("[ 2024.01.01 10:05:00 ] (None) Jumping from Jita to Perimeter", GAME)
            .unwrap();

        assert_eq!(
            event,
            LineEvent::SystemChanged {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap(),
                from: Some("Jita".to_string()),
                system: "Perimeter".to_string(),
            }
        );
    }

    #[test]
    fn unpadded_timestamp_is_parsed() {
        let event = classifier()
            .classify("[2024.01.01 10:05:00] (None) Jumping from Jita to Perimeter", GAME)
            .unwrap();
        match event {
            LineEvent::SystemChanged { timestamp, .. } => {
                assert_eq!(timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unparsable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let event = classifier()
            .classify("[ 2024.13.45 99:99:99 ] (None) Jumping from Jita to Perimeter", GAME)
            .unwrap();
        match event {
            LineEvent::SystemChanged { timestamp, system, .. } => {
                assert!(timestamp >= before);
                assert_eq!(system, "Perimeter");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn jump_names_are_sanitized() {
        let event = classifier()
            .classify(
                "[ 2024.01.01 10:05:00 ] (None) Jumping from <a href=\"showinfo:5//30000142\">Jita</a> to <b>New   Caldari</b>.",
                GAME,
            )
            .unwrap();
        match event {
            LineEvent::SystemChanged { from, system, .. } => {
                assert_eq!(from.as_deref(), Some("Jita"));
                assert_eq!(system, "New Caldari");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn local_change_ignored_while_game_log_tailed() {
        let line = "[2024.01.01 10:00:00] EVE System > Channel changed to Local : Jita";
        let c = classifier();

        let event = c.classify(line, CHAT_ONLY).unwrap();
        assert_eq!(
            event,
            LineEvent::SystemChanged {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                from: None,
                system: "Jita".to_string(),
            }
        );

        let with_game = ClassifyOptions {
            source: LogSource::Chat,
            game_log_tailed: true,
        };
        assert_eq!(c.classify(line, with_game), None);
    }

    #[test]
    fn fleet_invite() {
        let event = classifier()
            .classify(
                "[ 2024.01.01 10:00:00 ] (question) <a href=\"showinfo:1377//90000001\">John Roe</a> wants you to join their fleet, do you accept?",
                GAME,
            )
            .unwrap();
        assert_eq!(
            event,
            LineEvent::FleetInvite {
                inviter: "John Roe".to_string()
            }
        );
        assert_eq!(event.event_type(), Some(CombatEventType::FleetInvite));
        assert_eq!(event.display_text().unwrap(), "Fleet invite from John Roe");
    }

    #[test]
    fn follow_warp() {
        let event = classifier()
            .classify("[ 2024.01.01 10:00:00 ] (notify) Following John Roe in warp.", GAME)
            .unwrap();
        assert_eq!(event.display_text().unwrap(), "Following John Roe in warp");
        assert_eq!(event.event_type(), Some(CombatEventType::FollowWarp));
    }

    #[test]
    fn regroup() {
        let event = classifier()
            .classify("[ 2024.01.01 10:00:00 ] (notify) Regrouping to John Roe.", GAME)
            .unwrap();
        assert_eq!(
            event,
            LineEvent::Regroup {
                leader: "John Roe".to_string()
            }
        );
        assert_eq!(event.display_text().unwrap(), "Regrouping to John Roe");
    }

    #[test]
    fn compression() {
        let event = classifier()
            .classify(
                "[ 2024.01.01 10:00:00 ] (notify) Successfully compressed Veldspar into 100 Compressed Veldspar.",
                GAME,
            )
            .unwrap();
        assert_eq!(
            event,
            LineEvent::Compression {
                count: 100,
                item: "Compressed Veldspar".to_string()
            }
        );
        assert_eq!(event.display_text().unwrap(), "Compressed 100 Compressed Veldspar");
    }

    #[test]
    fn decloak() {
        let c = classifier();
        let event = c
            .classify(
                "[ 2024.01.01 10:00:00 ] (notify) Your cloak deactivates due to proximity to a nearby Customs Office.",
                GAME,
            )
            .unwrap();
        assert_eq!(
            event,
            LineEvent::Decloak {
                source: "Customs Office".to_string()
            }
        );
        assert_eq!(event.display_text().unwrap(), "Cloak disrupted by Customs Office");

        let direct = c
            .classify(
                "[ 2024.01.01 10:00:00 ] (notify) Your cloak deactivates due to proximity to Stargate (Jita).",
                GAME,
            )
            .unwrap();
        assert_eq!(
            direct,
            LineEvent::Decloak {
                source: "Stargate (Jita)".to_string()
            }
        );
    }

    #[test]
    fn mining_ping() {
        let event = classifier()
            .classify(
                "[ 2024.01.01 10:00:00 ] (mining) You mined 1,234 units of Veldspar",
                GAME,
            )
            .unwrap();
        assert_eq!(event, LineEvent::MiningPing);
        assert_eq!(event.event_type(), None);
    }

    #[test]
    fn length_filter_discards_short_and_long_lines() {
        let c = classifier();
        assert_eq!(c.classify("(mining) short", GAME), None);

        let long = format!("[ 2024.01.01 10:00:00 ] (mining) {}", "x".repeat(1000));
        assert_eq!(c.classify(&long, GAME), None);
    }

    #[test]
    fn control_and_zero_width_characters_are_stripped() {
        assert_eq!(
            normalize_line("\u{FEFF}\u{200B}[ 2024.01.01 ]\t(None)\u{7F} x \r"),
            "[ 2024.01.01 ](None) x"
        );
    }

    #[test]
    fn unrelated_lines_yield_nothing() {
        let c = classifier();
        assert_eq!(
            c.classify("[ 2024.01.01 10:00:00 ] (combat) 120 from Hostile - Hits", GAME),
            None
        );
        assert_eq!(
            c.classify("[ 2024.01.01 10:00:00 ] (notify) Something unrelated happened", GAME),
            None
        );
    }

    #[test]
    fn classification_is_independent_of_call_order() {
        let c = classifier();
        let lines = [
            "[ 2024.01.01 10:00:00 ] (notify) Regrouping to John Roe.",
            "[ 2024.01.01 10:00:01 ] (None) Jumping from Jita to Perimeter",
            "[ 2024.01.01 10:00:02 ] (mining) You mined 500 units of Scordite",
        ];

        let forward: Vec<_> = lines.iter().map(|l| c.classify(l, GAME)).collect();
        let mut backward: Vec<_> = lines.iter().rev().map(|l| c.classify(l, GAME)).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn sanitize_drops_exactly_one_trailing_punctuation() {
        let c = classifier();
        assert_eq!(c.sanitize_name("  Jita.. "), "Jita.");
        assert_eq!(c.sanitize_name("Perimeter,"), "Perimeter");
        assert_eq!(c.sanitize_name("<font size=\"12\">Amarr</font>"), "Amarr");
    }

    #[test]
    fn parse_helpers_for_seeding() {
        let c = classifier();
        let (_, system) = c
            .parse_local_change("\u{FEFF}[ 2024.01.01 10:00:00 ] EVE System > Channel changed to Local : Jita\r")
            .unwrap();
        assert_eq!(system, "Jita");

        let (_, from, to) = c
            .parse_jump("[ 2024.01.01 10:05:00 ] (None) Jumping from Jita to Perimeter")
            .unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("Jita", "Perimeter"));
    }
}
