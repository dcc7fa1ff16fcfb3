//! Configuration for crowdplay.
//!
//! One TOML file with `[controls]`, `[voting]` and `[weights]` tables.
//! Every field has a default matching the GBA deployment profile, so an
//! empty file is a valid config. A file that fails to read, parse or
//! validate is a startup error; it never silently falls back.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default config file path
pub const CONFIG_PATH: &str = "/etc/crowdplay/config.toml";

// ============================================================================
// CONTROLS
// ============================================================================

/// Hold duration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldConfig {
    /// Duration used when `!hold<key>` has no explicit number
    #[serde(default = "default_hold_ms")]
    pub default_ms: u64,

    /// Lower clamp for explicit durations
    #[serde(default = "default_hold_min_ms")]
    pub min_ms: u64,

    /// Upper clamp for explicit durations
    #[serde(default = "default_hold_max_ms")]
    pub max_ms: u64,
}

fn default_hold_ms() -> u64 {
    500 // GBA profile; the N64 profile used 800
}

fn default_hold_min_ms() -> u64 {
    100
}

fn default_hold_max_ms() -> u64 {
    5_000
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            default_ms: default_hold_ms(),
            min_ms: default_hold_min_ms(),
            max_ms: default_hold_max_ms(),
        }
    }
}

impl HoldConfig {
    /// Clamp an explicit hold duration into `[min_ms, max_ms]`
    pub fn clamp(&self, ms: u64) -> u64 {
        ms.clamp(self.min_ms, self.max_ms)
    }
}

/// One band of the momentum step table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentumStep {
    /// Upper intensity bound of this band, percent
    pub threshold: u8,
    /// Hold duration for intensities in this band
    pub duration_ms: u64,
}

/// Momentum (directional intensity) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Direction names that accept an intensity suffix (`!up75`)
    #[serde(default = "default_directions")]
    pub directions: Vec<String>,

    /// Intensity bands, any order; sorted on use
    #[serde(default = "default_momentum_steps")]
    pub steps: Vec<MomentumStep>,
}

fn default_directions() -> Vec<String> {
    ["up", "down", "left", "right"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_momentum_steps() -> Vec<MomentumStep> {
    vec![
        MomentumStep { threshold: 25, duration_ms: 100 },
        MomentumStep { threshold: 50, duration_ms: 200 },
        MomentumStep { threshold: 75, duration_ms: 300 },
        MomentumStep { threshold: 100, duration_ms: 400 },
    ]
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            directions: default_directions(),
            steps: default_momentum_steps(),
        }
    }
}

impl MomentumConfig {
    /// Duration of the smallest band whose threshold covers `intensity`,
    /// or of the largest band when intensity exceeds every threshold.
    pub fn duration_for(&self, intensity: u8) -> u64 {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.threshold);

        steps
            .iter()
            .find(|s| intensity <= s.threshold)
            .or_else(|| steps.last())
            .map(|s| s.duration_ms)
            .unwrap_or(0)
    }

    pub fn is_direction(&self, name: &str) -> bool {
        self.directions.iter().any(|d| d == name)
    }
}

/// Control mapping: which chat words are actions and what they press
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Single-character command markers
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,

    /// Canonical action key -> device input name
    #[serde(default = "default_actions")]
    pub actions: BTreeMap<String, String>,

    /// Alternate name -> canonical action key (single level)
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub hold: HoldConfig,

    #[serde(default)]
    pub momentum: MomentumConfig,
}

fn default_prefixes() -> Vec<String> {
    vec!["!".to_string(), "/".to_string()]
}

fn default_actions() -> BTreeMap<String, String> {
    [
        ("up", "UP"),
        ("down", "DOWN"),
        ("left", "LEFT"),
        ("right", "RIGHT"),
        ("a", "X"),
        ("b", "Z"),
        ("l", "A"),
        ("r", "S"),
        ("start", "ENTER"),
        ("select", "BACKSPACE"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            actions: default_actions(),
            aliases: BTreeMap::new(),
            hold: HoldConfig::default(),
            momentum: MomentumConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Resolve a chat word to its canonical action key.
    ///
    /// Aliases are consulted first and never chain: an alias whose target
    /// is not itself an action resolves to nothing.
    pub fn resolve_key(&self, name: &str) -> Option<&str> {
        let target = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.actions.get_key_value(target).map(|(k, _)| k.as_str())
    }

    pub fn is_action(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// Device input (emulator keystroke) bound to a canonical action key
    pub fn input_for(&self, key: &str) -> Option<&str> {
        self.actions.get(key).map(String::as_str)
    }

    /// Strip a configured command marker from `text`
    pub fn strip_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.prefixes
            .iter()
            .find_map(|p| text.strip_prefix(p.as_str()))
    }
}

// ============================================================================
// VOTING
// ============================================================================

/// When the deadline timer of a window is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Arming {
    /// On the first accepted vote; idle chat does not consume window time
    #[default]
    Lazy,
    /// As soon as the window opens
    Immediate,
}

/// Which accepted vote represents a tally bucket at dispatch time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandVariant {
    /// The first vote cast for the key in this window
    #[default]
    First,
    /// The most recent vote cast for the key in this window
    Last,
}

/// Vote window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Window length in milliseconds (observed 3000-8000)
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Pause between a window closing and the next one opening
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default)]
    pub arming: Arming,

    #[serde(default)]
    pub command_variant: CommandVariant,

    /// Votable action keys; empty means every configured action
    #[serde(default)]
    pub votable: Vec<String>,

    /// Closed windows kept by the history recorder
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_duration_ms() -> u64 {
    8_000
}

fn default_cooldown_ms() -> u64 {
    1_000
}

fn default_history_limit() -> usize {
    50
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            cooldown_ms: default_cooldown_ms(),
            arming: Arming::default(),
            command_variant: CommandVariant::default(),
            votable: Vec::new(),
            history_limit: default_history_limit(),
        }
    }
}

impl VotingConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Effective votable set against a control table
    pub fn votable_keys(&self, controls: &ControlConfig) -> BTreeSet<String> {
        if self.votable.is_empty() {
            controls.actions.keys().cloned().collect()
        } else {
            self.votable.iter().cloned().collect()
        }
    }
}

// ============================================================================
// WEIGHTS
// ============================================================================

/// Purchase amount tier for the purchase weight source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PurchaseTier {
    /// Minimum purchase amount for this tier
    pub min_amount: f64,
    /// Weight granted
    pub weight: f64,
}

/// Weight source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// How long a purchase keeps counting toward vote weight
    #[serde(default = "default_purchase_window")]
    pub purchase_window_secs: u64,

    /// Amount tiers, any order; highest matching `min_amount` wins
    #[serde(default = "default_purchase_tiers")]
    pub purchase_tiers: Vec<PurchaseTier>,

    /// Weight of a temporary boost granted on a trade event
    #[serde(default = "default_boost_weight")]
    pub boost_weight: f64,

    /// Lifetime of a temporary boost
    #[serde(default = "default_boost_secs")]
    pub boost_secs: u64,
}

fn default_purchase_window() -> u64 {
    300 // 5 minutes
}

fn default_purchase_tiers() -> Vec<PurchaseTier> {
    vec![
        PurchaseTier { min_amount: 0.0, weight: 1.5 },
        PurchaseTier { min_amount: 0.1, weight: 2.0 },
        PurchaseTier { min_amount: 0.5, weight: 3.0 },
        PurchaseTier { min_amount: 1.0, weight: 5.0 },
    ]
}

fn default_boost_weight() -> f64 {
    2.0
}

fn default_boost_secs() -> u64 {
    60
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            purchase_window_secs: default_purchase_window(),
            purchase_tiers: default_purchase_tiers(),
            boost_weight: default_boost_weight(),
            boost_secs: default_boost_secs(),
        }
    }
}

// ============================================================================
// FULL CONFIG
// ============================================================================

/// Full crowdplay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controls: ControlConfig,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub weights: WeightConfig,
}

impl Config {
    /// Load and validate config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate config text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: Path::new("<inline>").to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => {
                warn!("No config path given, using built-in defaults");
                Ok(Config::default())
            }
        }
    }

    /// Save default config to path (for init)
    pub fn save_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }

    /// Check cross-field rules. Called by every loader.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let controls = &self.controls;
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if controls.actions.is_empty() {
            return invalid("controls.actions is empty".to_string());
        }
        if controls.prefixes.is_empty() {
            return invalid("controls.prefixes is empty".to_string());
        }
        for prefix in &controls.prefixes {
            if prefix.chars().count() != 1 {
                return invalid(format!("prefix '{}' must be a single character", prefix));
            }
        }
        for (key, input) in &controls.actions {
            if key.is_empty() || key.chars().any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit()) {
                return invalid(format!("action key '{}' must be lowercase ascii", key));
            }
            if input.is_empty() {
                return invalid(format!("action '{}' has no input binding", key));
            }
        }
        for (alias, target) in &controls.aliases {
            // Chat text is lowercased before lookup
            if alias.is_empty() || alias.chars().any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit()) {
                return invalid(format!("alias '{}' must be lowercase ascii", alias));
            }
            if controls.actions.contains_key(alias) {
                return invalid(format!("alias '{}' shadows an action key", alias));
            }
            if !controls.actions.contains_key(target) {
                return invalid(format!(
                    "alias '{}' targets '{}', which is not an action",
                    alias, target
                ));
            }
        }

        let hold = &controls.hold;
        if hold.min_ms > hold.max_ms {
            return invalid(format!(
                "hold.min_ms {} exceeds hold.max_ms {}",
                hold.min_ms, hold.max_ms
            ));
        }
        if hold.default_ms < hold.min_ms || hold.default_ms > hold.max_ms {
            return invalid(format!(
                "hold.default_ms {} outside [{}, {}]",
                hold.default_ms, hold.min_ms, hold.max_ms
            ));
        }

        let momentum = &controls.momentum;
        if momentum.steps.is_empty() {
            return invalid("momentum.steps is empty".to_string());
        }
        for step in &momentum.steps {
            if step.threshold == 0 || step.threshold > 100 {
                return invalid(format!(
                    "momentum threshold {} outside 1..=100",
                    step.threshold
                ));
            }
        }
        for direction in &momentum.directions {
            if !controls.actions.contains_key(direction) {
                return invalid(format!("direction '{}' is not an action", direction));
            }
        }

        let voting = &self.voting;
        if voting.duration_ms == 0 {
            return invalid("voting.duration_ms must be positive".to_string());
        }
        for key in &voting.votable {
            if !controls.actions.contains_key(key) {
                return invalid(format!("votable key '{}' is not an action", key));
            }
        }

        let weights = &self.weights;
        if !weights.boost_weight.is_finite() || weights.boost_weight < 1.0 {
            return invalid(format!("boost_weight {} must be >= 1", weights.boost_weight));
        }
        for tier in &weights.purchase_tiers {
            if !tier.weight.is_finite() || tier.weight < 1.0 || !tier.min_amount.is_finite() {
                return invalid(format!("purchase tier {:?} is out of range", tier));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.voting.duration_ms, 8_000);
        assert_eq!(config.voting.cooldown_ms, 1_000);
        assert_eq!(config.voting.arming, Arming::Lazy);
        assert_eq!(config.controls.hold.default_ms, 500);
        assert_eq!(config.controls.actions.len(), 10);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[controls.aliases]
u = "up"

[controls.hold]
default_ms = 800

[voting]
duration_ms = 3000
arming = "immediate"
command_variant = "last"
"#;
        let config = Config::from_toml_str(toml_str).unwrap();
        assert_eq!(config.controls.hold.default_ms, 800);
        // Defaults for missing fields
        assert_eq!(config.controls.hold.max_ms, 5_000);
        assert_eq!(config.voting.duration_ms, 3_000);
        assert_eq!(config.voting.arming, Arming::Immediate);
        assert_eq!(config.voting.command_variant, CommandVariant::Last);
        assert_eq!(config.controls.resolve_key("u"), Some("up"));
    }

    #[test]
    fn test_alias_does_not_chain() {
        let mut controls = ControlConfig::default();
        controls.aliases.insert("x".to_string(), "y".to_string());
        controls.aliases.insert("y".to_string(), "up".to_string());
        assert_eq!(controls.resolve_key("y"), Some("up"));
        assert_eq!(controls.resolve_key("x"), None);
    }

    #[test]
    fn test_rejects_alias_to_unknown_action() {
        let toml_str = r#"
[controls.aliases]
cu = "cup"
"#;
        let err = Config::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_uppercase_alias() {
        let toml_str = r#"
[controls.aliases]
U = "up"
"#;
        let err = Config::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(Config::from_toml_str("[controls.aliases]\nu = \"up\"\n").is_ok());
    }

    #[test]
    fn test_rejects_inverted_hold_clamp() {
        let toml_str = r#"
[controls.hold]
min_ms = 6000
max_ms = 100
default_ms = 500
"#;
        assert!(Config::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_rejects_zero_duration_and_unknown_votable() {
        assert!(Config::from_toml_str("[voting]\nduration_ms = 0\n").is_err());
        assert!(Config::from_toml_str("[voting]\nvotable = [\"jump\"]\n").is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = Config::from_toml_str("[voting\nduration_ms = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_momentum_duration_bands() {
        let momentum = MomentumConfig::default();
        assert_eq!(momentum.duration_for(1), 100);
        assert_eq!(momentum.duration_for(25), 100);
        assert_eq!(momentum.duration_for(26), 200);
        assert_eq!(momentum.duration_for(75), 300);
        assert_eq!(momentum.duration_for(100), 400);
    }

    #[test]
    fn test_momentum_above_all_bands_uses_largest() {
        let momentum = MomentumConfig {
            directions: default_directions(),
            steps: vec![
                MomentumStep { threshold: 60, duration_ms: 250 },
                MomentumStep { threshold: 30, duration_ms: 120 },
            ],
        };
        assert_eq!(momentum.duration_for(20), 120);
        assert_eq!(momentum.duration_for(45), 250);
        assert_eq!(momentum.duration_for(90), 250);
    }

    #[test]
    fn test_votable_keys_default_to_actions() {
        let config = Config::default();
        let keys = config.voting.votable_keys(&config.controls);
        assert!(keys.contains("start"));
        assert_eq!(keys.len(), config.controls.actions.len());
    }

    #[test]
    fn test_input_for() {
        let controls = ControlConfig::default();
        assert_eq!(controls.input_for("a"), Some("X"));
        assert_eq!(controls.input_for("cup"), None);
    }

    #[test]
    fn test_save_and_load_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crowdplay/config.toml");
        Config::save_default(&path).unwrap();
        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load_from_path("/nonexistent/crowdplay.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(Config::load_or_default(None).is_ok());
    }
}
