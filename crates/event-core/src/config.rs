//! Configuration for the event bus
//!
//! Values can come from defaults, a TOML/JSON file and `EVENT_BUS_*`
//! environment variables (in increasing order of precedence).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EventError, Result};

/// Environment variable prefix recognised by [`EventBusConfig::from_env`].
pub const ENV_PREFIX: &str = "EVENT_BUS";

/// Construction-time options for an `EventBus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Maximum number of events retained in the in-memory log
    pub max_log_size: usize,
    /// Log every emission at debug level
    pub enable_debug_logging: bool,
    /// Record per-event dispatch timings
    pub enable_performance_metrics: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_log_size: 10_000,
            enable_debug_logging: true,
            enable_performance_metrics: true,
        }
    }
}

impl EventBusConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()
    }

    /// Load from a TOML or JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EventError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()
    }

    /// Defaults overridden by `EVENT_BUS_MAX_LOG_SIZE` and friends
    pub fn from_env() -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.max_log_size == 0 {
            return Err(EventError::Config("max_log_size must be at least 1".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EventBusConfig::default();
        assert_eq!(config.max_log_size, 10_000);
        assert!(config.enable_debug_logging);
        assert!(config.enable_performance_metrics);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EventBusConfig::from_toml_str("max_log_size = 50\n").unwrap();
        assert_eq!(config.max_log_size, 50);
        assert!(config.enable_debug_logging);
    }

    #[test]
    fn test_zero_log_size_rejected() {
        let err = EventBusConfig::from_toml_str("max_log_size = 0").unwrap_err();
        assert!(matches!(err, EventError::Config(_)));
    }

    #[test]
    fn test_from_file_reads_json() {
        let path = std::env::temp_dir().join(format!("event-bus-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "max_log_size": 7, "enable_debug_logging": false }"#).unwrap();
        let config = EventBusConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_log_size, 7);
        assert!(!config.enable_debug_logging);
        assert!(config.enable_performance_metrics);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EventBusConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, EventError::Config(_)));
    }
}
