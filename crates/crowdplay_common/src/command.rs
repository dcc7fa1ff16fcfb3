//! Normalized control commands.
//!
//! A chat message becomes exactly one of these. The enum shape carries
//! the per-kind fields, so a Press can never hold a duration and a
//! ReleaseAll can never name a key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a [`NormalizedCommand`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Press,
    Hold,
    Momentum,
    ReleaseAll,
    Invalid,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Press => "press",
            CommandKind::Hold => "hold",
            CommandKind::Momentum => "momentum",
            CommandKind::ReleaseAll => "release_all",
            CommandKind::Invalid => "invalid",
        }
    }
}

/// A parsed control command. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedCommand {
    /// Single tap of `key`
    Press { key: String },
    /// Press and keep `key` down for `duration_ms`
    Hold { key: String, duration_ms: u64 },
    /// Directional hold whose duration comes from the intensity step table
    Momentum {
        key: String,
        intensity_percent: u8,
        duration_ms: u64,
    },
    /// Let go of everything currently held
    ReleaseAll,
    /// Not a command; callers ignore it
    Invalid,
}

impl NormalizedCommand {
    pub fn press(key: impl Into<String>) -> Self {
        NormalizedCommand::Press { key: key.into() }
    }

    pub fn hold(key: impl Into<String>, duration_ms: u64) -> Self {
        NormalizedCommand::Hold {
            key: key.into(),
            duration_ms,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            NormalizedCommand::Press { .. } => CommandKind::Press,
            NormalizedCommand::Hold { .. } => CommandKind::Hold,
            NormalizedCommand::Momentum { .. } => CommandKind::Momentum,
            NormalizedCommand::ReleaseAll => CommandKind::ReleaseAll,
            NormalizedCommand::Invalid => CommandKind::Invalid,
        }
    }

    /// Canonical action key, for the kinds that carry one
    pub fn key(&self) -> Option<&str> {
        match self {
            NormalizedCommand::Press { key }
            | NormalizedCommand::Hold { key, .. }
            | NormalizedCommand::Momentum { key, .. } => Some(key),
            NormalizedCommand::ReleaseAll | NormalizedCommand::Invalid => None,
        }
    }

    /// Tally bucket this command votes under.
    ///
    /// Holds and momentum collapse onto their base key, so `!holda 800`
    /// and `!a` accumulate together. ReleaseAll and Invalid have none.
    pub fn vote_key(&self) -> Option<&str> {
        self.key()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            NormalizedCommand::Hold { duration_ms, .. }
            | NormalizedCommand::Momentum { duration_ms, .. } => Some(*duration_ms),
            _ => None,
        }
    }

    pub fn intensity_percent(&self) -> Option<u8> {
        match self {
            NormalizedCommand::Momentum {
                intensity_percent, ..
            } => Some(*intensity_percent),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, NormalizedCommand::Invalid)
    }
}

impl fmt::Display for NormalizedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedCommand::Press { key } => write!(f, "{}", key),
            NormalizedCommand::Hold { key, duration_ms } => {
                write!(f, "hold {} ({}ms)", key, duration_ms)
            }
            NormalizedCommand::Momentum {
                key,
                intensity_percent,
                duration_ms,
            } => write!(f, "{} {}% ({}ms)", key, intensity_percent, duration_ms),
            NormalizedCommand::ReleaseAll => write!(f, "release"),
            NormalizedCommand::Invalid => write!(f, "invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_votes_under_base_key() {
        let hold = NormalizedCommand::hold("a", 800);
        let press = NormalizedCommand::press("a");
        assert_eq!(hold.vote_key(), press.vote_key());
        assert_eq!(hold.duration_ms(), Some(800));
        assert_eq!(press.duration_ms(), None);
    }

    #[test]
    fn test_release_and_invalid_have_no_vote_key() {
        assert_eq!(NormalizedCommand::ReleaseAll.vote_key(), None);
        assert_eq!(NormalizedCommand::Invalid.vote_key(), None);
        assert!(!NormalizedCommand::Invalid.is_valid());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let cmd = NormalizedCommand::Momentum {
            key: "up".to_string(),
            intensity_percent: 75,
            duration_ms: 300,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "momentum");
        assert_eq!(json["intensity_percent"], 75);
        assert_eq!(cmd.kind().as_str(), "momentum");
    }

    #[test]
    fn test_display() {
        assert_eq!(NormalizedCommand::hold("b", 1200).to_string(), "hold b (1200ms)");
        assert_eq!(NormalizedCommand::ReleaseAll.to_string(), "release");
    }
}
