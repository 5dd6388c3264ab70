//! Server configuration

use std::path::Path;
use std::time::Duration;

use kryptopoly_core::RuleTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound a GM may pick for `max_players` (2-6, GM included)
    pub max_players_limit: u8,
    /// Capacity of each session's command queue
    pub command_queue: usize,
    /// How long a finished session stays reachable
    #[serde(with = "secs")]
    pub game_over_retention: Duration,
    /// How often terminated sessions are swept
    #[serde(with = "secs")]
    pub sweep_interval: Duration,
    /// Award rules and settlement percentages
    pub rules: RuleTable,
    /// Directory with `markets.yaml`, `cards.yaml` and `years.yaml`;
    /// the embedded catalog is used when absent
    pub catalog_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players_limit: 6,
            command_queue: 64,
            game_over_retention: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            rules: RuleTable::default(),
            catalog_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(String),
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(kryptopoly_core::MIN_PLAYERS..=kryptopoly_core::MAX_PLAYERS)
            .contains(&self.max_players_limit)
        {
            return Err(ConfigError::Invalid(format!(
                "max_players_limit must be between {} and {}",
                kryptopoly_core::MIN_PLAYERS,
                kryptopoly_core::MAX_PLAYERS
            )));
        }
        if self.command_queue == 0 {
            return Err(ConfigError::Invalid("command_queue must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be positive".into()));
        }
        Ok(())
    }
}

/// Durations are written as whole seconds in YAML.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
