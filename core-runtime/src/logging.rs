//! # Logging & Tracing Infrastructure
//!
//! Configures the `tracing-subscriber` stack for the streaming core:
//! - Pretty, JSON, and compact output formats
//! - Module-level filtering via an env-filter expression
//! - Sensible defaults per build profile (pretty in debug, JSON in release)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Pretty)
//!     .with_filter("core_stream=debug");
//!
//! init_logging(config).expect("Failed to initialize logging");
//!
//! tracing::info!("Player core started");
//! ```

use crate::error::{Error, Result};
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production consoles
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum log level
    pub level: Level,
    /// Custom filter string (e.g., "core_stream=debug,bridge_desktop=trace")
    pub filter: Option<String>,
    /// Display target module in logs
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: Level::INFO,
            filter: None,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set custom filter string
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Enable or disable target display
    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

/// Initialize the logging system.
///
/// Call once during application startup; subsequent calls return an error.
///
/// # Errors
///
/// Returns an error if logging is already initialized or the filter string
/// is invalid.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.display_target);

    let init_result = match config.format {
        LogFormat::Pretty => builder.pretty().finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
        LogFormat::Compact => builder.compact().finish().try_init(),
    };

    init_result.map_err(|_| Error::LoggingInitialized)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => format!("{},{}", config.level, custom),
        None => config.level.to_string(),
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_info_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.display_target);
        assert!(config.filter.is_none());
    }

    #[test]
    fn builder_chains_apply() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(Level::DEBUG)
            .with_filter("core_stream=trace")
            .with_target(false);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.filter.as_deref(), Some("core_stream=trace"));
        assert!(!config.display_target);
    }

    #[test]
    fn filter_accepts_module_directives() {
        let config = LoggingConfig::default().with_filter("core_stream=debug");
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn filter_rejects_garbage() {
        let config = LoggingConfig::default().with_filter("===");
        assert!(build_filter(&config).is_err());
    }
}
