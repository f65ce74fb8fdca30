//! berth.toml configuration parser.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BerthConfig {
    pub planner: PlannerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy: PlannerKind,
    /// Upper bound on waiting for a capacity record lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Fixed seed for candidate shuffling. Unset means fresh entropy per call.
    pub shuffle_seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: PlannerKind::FirstFit,
            lock_timeout_ms: 500,
            shuffle_seed: None,
        }
    }
}

impl PlannerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name, resolved against the data directory when relative.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("berth.redb"),
        }
    }
}

/// Planner strategy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    #[default]
    FirstFit,
    BestFit,
}

impl PlannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlannerKind::FirstFit => "first_fit",
            PlannerKind::BestFit => "best_fit",
        }
    }
}

impl FromStr for PlannerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_fit" | "first-fit" | "FirstFit" => Ok(PlannerKind::FirstFit),
            "best_fit" | "best-fit" | "BestFit" => Ok(PlannerKind::BestFit),
            other => Err(ConfigError::Invalid(format!("unknown planner strategy: {other}"))),
        }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planner.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "planner.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        Ok(())
    }
}

impl FromStr for BerthConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: BerthConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config: BerthConfig = "".parse().unwrap();
        assert_eq!(config, BerthConfig::default());
        assert_eq!(config.planner.strategy, PlannerKind::FirstFit);
        assert_eq!(config.planner.lock_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[planner]
strategy = "best_fit"
lock_timeout_ms = 50
shuffle_seed = 7

[store]
path = "/var/lib/berth/state.redb"
"#;
        let config: BerthConfig = toml_str.parse().unwrap();
        assert_eq!(config.planner.strategy, PlannerKind::BestFit);
        assert_eq!(config.planner.lock_timeout_ms, 50);
        assert_eq!(config.planner.shuffle_seed, Some(7));
        assert_eq!(config.store.path, PathBuf::from("/var/lib/berth/state.redb"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = "[planner]\nlock_timeout_ms = 0\n".parse::<BerthConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let err = "[planner]\nstrategy = \"worst_fit\"\n".parse::<BerthConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!("worst_fit".parse::<PlannerKind>().is_err());
        assert_eq!("best-fit".parse::<PlannerKind>().unwrap(), PlannerKind::BestFit);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = BerthConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("first_fit"));
        let back: BerthConfig = toml_str.parse().unwrap();
        assert_eq!(back, config);
    }
}
