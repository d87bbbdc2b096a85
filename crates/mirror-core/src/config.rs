use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Episodes completed later than this after `begin` are discarded
    pub stale_after_ms: u64,
    /// Minimum spacing between episode starts in the same bucket
    pub cooldown_ms: u64,
    /// Maximum number of episodes kept in the log
    pub capacity: usize,
    /// Episodes older than this are evicted from the log
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Raw entropy is divided by this and clamped to [0, 1] before scoring
    pub entropy_scale: f64,
    /// Symmetric clip bound applied to every reward, if set
    #[serde(default)]
    pub clip: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Exploration probability
    pub epsilon: f64,
    /// Entries with fewer samples are treated as "no data"
    pub min_samples: u64,
    /// RNG seed; `None` seeds from OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Period of the scheduled aggregation pass
    pub interval_ms: u64,
    /// Passes requested sooner than this after the previous one are skipped.
    /// Applies to forced replays as well as scheduled passes. 0 disables.
    pub min_pass_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 5_000,
            cooldown_ms: 2_000,
            capacity: 5_000,
            retention_secs: 86_400, // 24h
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            entropy_scale: 1.0,
            clip: None,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            min_samples: 1,
            seed: None,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            min_pass_interval_ms: 0,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: MirrorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    /// Variables are prefixed with MIRROR_, e.g. MIRROR_SELECTOR_EPSILON=0.05
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. User config file (if exists)
    /// 3. Default config file
    /// 4. Built-in defaults (lowest priority)
    pub fn load_layered(
        default_path: Option<&Path>,
        user_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = MirrorConfig::default();

        if let Some(path) = default_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        if let Some(path) = user_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("Invalid {}", name)))
        }

        // Recorder overrides
        if let Ok(val) = env::var("MIRROR_RECORDER_STALE_AFTER_MS") {
            self.recorder.stale_after_ms = parse("MIRROR_RECORDER_STALE_AFTER_MS", val)?;
        }
        if let Ok(val) = env::var("MIRROR_RECORDER_COOLDOWN_MS") {
            self.recorder.cooldown_ms = parse("MIRROR_RECORDER_COOLDOWN_MS", val)?;
        }
        if let Ok(val) = env::var("MIRROR_RECORDER_CAPACITY") {
            self.recorder.capacity = parse("MIRROR_RECORDER_CAPACITY", val)?;
        }
        if let Ok(val) = env::var("MIRROR_RECORDER_RETENTION_SECS") {
            self.recorder.retention_secs = parse("MIRROR_RECORDER_RETENTION_SECS", val)?;
        }

        // Reward overrides
        if let Ok(val) = env::var("MIRROR_REWARD_ENTROPY_SCALE") {
            self.reward.entropy_scale = parse("MIRROR_REWARD_ENTROPY_SCALE", val)?;
        }

        // Selector overrides
        if let Ok(val) = env::var("MIRROR_SELECTOR_EPSILON") {
            self.selector.epsilon = parse("MIRROR_SELECTOR_EPSILON", val)?;
        }
        if let Ok(val) = env::var("MIRROR_SELECTOR_SEED") {
            self.selector.seed = Some(parse("MIRROR_SELECTOR_SEED", val)?);
        }

        // Aggregation overrides
        if let Ok(val) = env::var("MIRROR_AGGREGATION_INTERVAL_MS") {
            self.aggregation.interval_ms = parse("MIRROR_AGGREGATION_INTERVAL_MS", val)?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recorder.stale_after_ms == 0 {
            return Err(ConfigError::Validation(
                "recorder.stale_after_ms must be > 0".to_string(),
            ));
        }
        if self.recorder.capacity == 0 {
            return Err(ConfigError::Validation(
                "recorder.capacity must be > 0".to_string(),
            ));
        }
        if self.recorder.retention_secs == 0 {
            return Err(ConfigError::Validation(
                "recorder.retention_secs must be > 0".to_string(),
            ));
        }

        if !self.reward.entropy_scale.is_finite() || self.reward.entropy_scale <= 0.0 {
            return Err(ConfigError::Validation(
                "reward.entropy_scale must be positive".to_string(),
            ));
        }
        if let Some(clip) = self.reward.clip {
            if !clip.is_finite() || clip <= 0.0 {
                return Err(ConfigError::Validation(
                    "reward.clip must be positive".to_string(),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.selector.epsilon) {
            return Err(ConfigError::Validation(
                "selector.epsilon must be in [0, 1]".to_string(),
            ));
        }
        if self.selector.min_samples == 0 {
            return Err(ConfigError::Validation(
                "selector.min_samples must be >= 1".to_string(),
            ));
        }

        if self.aggregation.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "aggregation.interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}
