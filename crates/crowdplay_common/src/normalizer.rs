//! Chat text -> [`NormalizedCommand`].
//!
//! Grammars are tried in a fixed order and the first match wins:
//!
//! 1. `release`                      -> ReleaseAll
//! 2. `hold<key>[ <ms>]`             -> Hold (ms clamped, or the configured default)
//! 3. `<direction><1-3 digits>`      -> Momentum (intensity clamped to 1..=100)
//! 4. `<key>`                        -> Press
//! 5. anything else                  -> Invalid
//!
//! Aliases resolve (one level) before every action-key check.
//! The function is total: it never panics and never errors.

use crate::command::NormalizedCommand;
use crate::config::ControlConfig;
use regex::Regex;
use std::sync::LazyLock;

static HOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hold\s*([a-z]+)(?:\s+(\d+))?$").unwrap());

static MOMENTUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+)(\d{1,3})$").unwrap());

/// Normalize one chat message against a control table
pub fn normalize(text: &str, config: &ControlConfig) -> NormalizedCommand {
    let msg = text.trim().to_lowercase();

    let body = match config.strip_prefix(&msg) {
        Some(body) if !body.is_empty() => body,
        _ => return NormalizedCommand::Invalid,
    };

    if body == "release" {
        return NormalizedCommand::ReleaseAll;
    }

    if let Some(caps) = HOLD_RE.captures(body) {
        return parse_hold(&caps[1], caps.get(2).map(|m| m.as_str()), config);
    }

    if let Some(caps) = MOMENTUM_RE.captures(body) {
        if let Some(key) = config.resolve_key(&caps[1]) {
            if config.momentum.is_direction(key) {
                return momentum(key, &caps[2], config);
            }
        }
    }

    match config.resolve_key(body) {
        Some(key) => NormalizedCommand::press(key),
        None => NormalizedCommand::Invalid,
    }
}

fn parse_hold(name: &str, ms: Option<&str>, config: &ControlConfig) -> NormalizedCommand {
    let Some(key) = config.resolve_key(name) else {
        return NormalizedCommand::Invalid;
    };

    let duration_ms = match ms {
        // Digits only; overflow means "very long", which clamps to max
        Some(digits) => config.hold.clamp(digits.parse::<u64>().unwrap_or(u64::MAX)),
        None => config.hold.default_ms,
    };

    NormalizedCommand::hold(key, duration_ms)
}

fn momentum(key: &str, digits: &str, config: &ControlConfig) -> NormalizedCommand {
    // At most three digits, so this always fits; 0 clamps up to 1
    let intensity = digits.parse::<u16>().unwrap_or(100).clamp(1, 100) as u8;

    NormalizedCommand::Momentum {
        key: key.to_string(),
        intensity_percent: intensity,
        duration_ms: config.momentum.duration_for(intensity),
    }
}

/// Help catalog for overlays and `!help`-style replies
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandCatalog {
    pub actions: Vec<String>,
    pub aliases: Vec<(String, String)>,
    pub hold_default_ms: u64,
    pub momentum_levels: usize,
    pub examples: Vec<String>,
}

/// Describe what chat can type under `config`
pub fn catalog(config: &ControlConfig) -> CommandCatalog {
    let prefix = config
        .prefixes
        .first()
        .cloned()
        .unwrap_or_else(|| "!".to_string());
    let first_action = config.actions.keys().next().cloned().unwrap_or_default();
    let first_direction = config.momentum.directions.first().cloned().unwrap_or_default();

    CommandCatalog {
        actions: config.actions.keys().cloned().collect(),
        aliases: config
            .aliases
            .iter()
            .map(|(a, t)| (a.clone(), t.clone()))
            .collect(),
        hold_default_ms: config.hold.default_ms,
        momentum_levels: config.momentum.steps.len(),
        examples: vec![
            format!("{}{}", prefix, first_action),
            format!("{}hold{} {}", prefix, first_action, config.hold.default_ms.saturating_mul(2)),
            format!("{}{}50", prefix, first_direction),
            format!("{}release", prefix),
        ],
    }
}
