//! # zzuf-config
//!
//! Configuration management for the zzuf stream layer.
//!
//! Loads configuration from:
//! 1. The TOML file named by `ZZUF_CONFIG` (optional)
//! 2. Environment variables (highest priority)
//!
//! The preload library reads this exactly once, from its load-time
//! constructor, before the layer is armed.

pub mod logging;

use logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_CONFIG: &str = "ZZUF_CONFIG";
pub const ENV_SEED: &str = "ZZUF_SEED";
pub const ENV_RATIO: &str = "ZZUF_RATIO";
pub const ENV_INCLUDE: &str = "ZZUF_INCLUDE";
pub const ENV_EXCLUDE: &str = "ZZUF_EXCLUDE";
pub const ENV_STREAM_MODE: &str = "ZZUF_STREAM_MODE";
pub const ENV_DEBUG: &str = "ZZUF_DEBUG";
pub const ENV_LOG_LEVEL: &str = "ZZUF_LOG_LEVEL";
pub const ENV_DISABLE: &str = "ZZUF_DISABLE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fuzz: FuzzConfig,
    pub watch: WatchConfig,
    pub stream: StreamConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load config using `lookup` in place of the process environment.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Config::default(),
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(seed) = lookup(ENV_SEED) {
            self.fuzz.seed = seed.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_SEED,
                value: seed,
            })?;
        }
        if let Some(ratio) = lookup(ENV_RATIO) {
            let parsed: f64 = ratio.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_RATIO,
                value: ratio.clone(),
            })?;
            if !parsed.is_finite() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_RATIO,
                    value: ratio,
                });
            }
            self.fuzz.ratio = parsed;
        }
        self.fuzz.ratio = self.fuzz.ratio.clamp(0.0, 1.0);

        if let Some(include) = lookup(ENV_INCLUDE) {
            self.watch.include = vec![include];
        }
        if let Some(exclude) = lookup(ENV_EXCLUDE) {
            self.watch.exclude = vec![exclude];
        }
        if let Some(mode) = lookup(ENV_STREAM_MODE) {
            self.stream.mode = mode.parse()?;
        }
        if lookup(ENV_DISABLE).is_some() {
            self.stream.enabled = false;
        }
        if lookup(ENV_DEBUG).is_some() {
            self.log.debug = true;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level.parse()?;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Corruption engine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Process-global seed keying every corruption mask
    pub seed: u32,
    /// Fraction of bits flipped, in [0, 1]
    pub ratio: f64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            ratio: 0.004,
        }
    }
}

/// Descriptor selection patterns (regular expressions matched against paths)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Only watch paths matching one of these (empty = everything)
    pub include: Vec<String>,
    /// Never watch paths matching one of these
    pub exclude: Vec<String>,
}

/// Requested corruption strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Pick from host capabilities
    #[default]
    Auto,
    /// Corrupt whole buffers at refill time (BSD libcs only)
    Refill,
    /// Reconcile block reads against the stream cursor
    Differential,
    /// Replay every read through the elemental character primitive
    Replay,
}

impl std::str::FromStr for StreamMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(StreamMode::Auto),
            "refill" => Ok(StreamMode::Refill),
            "differential" => Ok(StreamMode::Differential),
            "replay" => Ok(StreamMode::Replay),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_STREAM_MODE,
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub mode: StreamMode,
    /// When false the layer never arms and every call passes through
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::Auto,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Install a stderr subscriber for diagnostics
    pub debug: bool,
    pub level: LogLevel,
    /// Optional log file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: LogLevel::Debug,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fuzz.seed, 0);
        assert!((config.fuzz.ratio - 0.004).abs() < f64::EPSILON);
        assert!(config.watch.include.is_empty());
        assert!(config.stream.enabled);
        assert_eq!(config.stream.mode, StreamMode::Auto);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[fuzz]"));
        assert!(toml_str.contains("[stream]"));
        assert!(toml_str.contains("mode = \"auto\""));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::load_with(lookup(&[
            (ENV_SEED, "1234"),
            (ENV_RATIO, "0.5"),
            (ENV_INCLUDE, r"\.png$"),
            (ENV_STREAM_MODE, "Replay"),
            (ENV_DEBUG, "1"),
        ]))
        .unwrap();
        assert_eq!(config.fuzz.seed, 1234);
        assert!((config.fuzz.ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.watch.include, vec![r"\.png$".to_string()]);
        assert_eq!(config.stream.mode, StreamMode::Replay);
        assert!(config.log.debug);
    }

    #[test]
    fn test_ratio_is_clamped() {
        let config = Config::load_with(lookup(&[(ENV_RATIO, "7")])).unwrap();
        assert!((config.fuzz.ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::load_with(lookup(&[(ENV_SEED, "not-a-number")])),
            Err(ConfigError::InvalidValue { key: ENV_SEED, .. })
        ));
        assert!(matches!(
            Config::load_with(lookup(&[(ENV_RATIO, "NaN")])),
            Err(ConfigError::InvalidValue { key: ENV_RATIO, .. })
        ));
        assert!(Config::load_with(lookup(&[(ENV_STREAM_MODE, "turbo")])).is_err());
    }

    #[test]
    fn test_disable_flag() {
        let config = Config::load_with(lookup(&[(ENV_DISABLE, "")])).unwrap();
        assert!(!config.stream.enabled);
    }
}
