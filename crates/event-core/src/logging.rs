//! Tracing subscriber setup for binaries built on the bus.
//!
//! `RUST_LOG` directives always win; the configured level only applies to
//! targets `RUST_LOG` does not mention.

use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{EventError, Result};

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging section, loadable next to [`EventBusConfig`](crate::EventBusConfig).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level, parsed with [`parse_log_level`].
    pub level: String,
    pub format: LogFormat,
    /// Print the file and line of each event.
    pub source_locations: bool,
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            source_locations: false,
            app_name: "event-core".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: level.to_string().to_lowercase(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        let level = parse_log_level(&self.level)?;
        Ok(EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy())
    }
}

/// Install the global tracing subscriber. Fails if one is already set.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_file(config.source_locations)
        .with_line_number(config.source_locations);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| EventError::Config(format!("tracing subscriber already installed: {}", e)))?;

    tracing::info!(app = %config.app_name, level = %config.level, "logging ready");
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| EventError::Config(format!("unknown log level '{}'", level)))
}
