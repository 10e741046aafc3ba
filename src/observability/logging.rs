//! Structured logging configuration.

use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const ENV_LOG: &str = "RECORDSTORE_LOG";
/// Environment variable selecting the log format.
pub const ENV_LOG_FORMAT: &str = "RECORDSTORE_LOG_FORMAT";
/// Environment variable naming a log file.
pub const ENV_LOG_FILE: &str = "RECORDSTORE_LOG_FILE";
/// Fallback environment variable for filter directives.
pub const ENV_RUST_LOG: &str = "RUST_LOG";

const DEFAULT_FILTER: &str = "info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
    /// Single-line human readable output.
    Compact,
}

impl LogFormat {
    /// Parses a format name. Unknown names fall back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `recordstore=debug`.
    pub filter: String,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: DEFAULT_FILTER.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds a configuration from `RECORDSTORE_LOG` (falling back to
    /// `RUST_LOG`), `RECORDSTORE_LOG_FORMAT` and `RECORDSTORE_LOG_FILE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LoggingConfig::from_env`] with variables resolved through
    /// `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        let filter = non_empty(ENV_LOG)
            .or_else(|| non_empty(ENV_RUST_LOG))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = non_empty(ENV_LOG_FORMAT)
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            format,
            filter,
            file: non_empty(ENV_LOG_FILE).map(PathBuf::from),
        }
    }

    /// Sets the format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Builds the filter from the configured directives.
    pub(crate) fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| {
            Error::InvalidInput(format!("invalid log filter '{}': {e}", self.filter))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test_case("json", LogFormat::Json ; "json")]
    #[test_case(" Compact ", LogFormat::Compact ; "compact trimmed")]
    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("yaml", LogFormat::Pretty ; "unknown falls back")]
    fn test_format_parse(input: &str, expected: LogFormat) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn test_recordstore_log_wins_over_rust_log() {
        let vars: HashMap<&str, &str> = [
            (ENV_LOG, "recordstore=debug"),
            (ENV_RUST_LOG, "warn"),
            (ENV_LOG_FORMAT, "json"),
        ]
        .into_iter()
        .collect();
        let config = LoggingConfig::from_lookup(|key| vars.get(key).map(ToString::to_string));
        assert_eq!(config.filter, "recordstore=debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, None);
    }

    #[test]
    fn test_rust_log_fallback_and_default() {
        let config = LoggingConfig::from_lookup(|key| {
            (key == ENV_RUST_LOG).then(|| "trace".to_string())
        });
        assert_eq!(config.filter, "trace");

        let config = LoggingConfig::from_lookup(|_| None);
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LoggingConfig::default().with_filter("recordstore=loud");
        assert!(matches!(config.env_filter(), Err(Error::InvalidInput(_))));
        assert!(LoggingConfig::default().env_filter().is_ok());
    }
}
