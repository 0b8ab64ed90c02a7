//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Limits applied by the narrative extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Longest narration accepted, in bytes.
    pub max_input_len: usize,

    /// More events than this lowers confidence.
    pub max_events: usize,

    /// Any single HP change larger than this lowers confidence.
    pub max_hp_change: i32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_input_len: 64 * 1024,
            max_events: 20,
            max_hp_change: 100,
        }
    }
}

/// Configuration for the turn orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for narration before falling back.
    pub narration_timeout: Duration,

    /// Story events kept from each turn.
    pub story_events_per_turn: usize,

    /// Size of the session's story history ring.
    pub story_history_limit: usize,

    /// Roll required dice automatically instead of pausing for the player.
    pub auto_roll_dice: bool,

    /// Model for the narration backend.
    pub model: Option<String>,

    /// Maximum tokens for narration.
    pub max_tokens: usize,

    /// Temperature for narration.
    pub temperature: Option<f32>,

    pub parser: ParserConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            narration_timeout: Duration::from_secs(30),
            story_events_per_turn: 5,
            story_history_limit: 50,
            auto_roll_dice: false,
            model: None,
            max_tokens: 1024,
            temperature: Some(0.8),
            parser: ParserConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DM_BRIDGE_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_value::<u64>("DM_BRIDGE_NARRATION_TIMEOUT_SECS") {
            config.narration_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = env_value("DM_BRIDGE_STORY_HISTORY") {
            config.story_history_limit = limit;
        }
        if let Some(count) = env_value("DM_BRIDGE_STORY_EVENTS_PER_TURN") {
            config.story_events_per_turn = count;
        }
        if let Some(auto) = env_value("DM_BRIDGE_AUTO_ROLL") {
            config.auto_roll_dice = auto;
        }
        if let Ok(model) = std::env::var("DM_BRIDGE_MODEL") {
            if !model.trim().is_empty() {
                config.model = Some(model);
            }
        }
        if let Some(tokens) = env_value("DM_BRIDGE_MAX_TOKENS") {
            config.max_tokens = tokens;
        }
        config
    }

    /// Set how long narration may take.
    pub fn with_narration_timeout(mut self, timeout: Duration) -> Self {
        self.narration_timeout = timeout;
        self
    }

    pub fn with_story_events_per_turn(mut self, count: usize) -> Self {
        self.story_events_per_turn = count;
        self
    }

    pub fn with_story_history_limit(mut self, limit: usize) -> Self {
        self.story_history_limit = limit.max(1);
        self
    }

    pub fn with_auto_roll_dice(mut self, auto: bool) -> Self {
        self.auto_roll_dice = auto;
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens for responses.
    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
