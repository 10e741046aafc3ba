//! Configuration management.
//!
//! A [`DatabaseConfig`] can be built in code, read from the `[database]`
//! table of a TOML file, and adjusted from `RECORDSTORE_*` environment
//! variables.

use crate::storage::is_identifier;
use crate::storage::sqlite::IN_MEMORY_TARGET;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable overriding [`DatabaseConfig::target`].
pub const ENV_DATABASE_FILE: &str = "RECORDSTORE_DATABASE_FILE";
/// Environment variable overriding [`DatabaseConfig::table_prefix`].
pub const ENV_TABLE_PREFIX: &str = "RECORDSTORE_TABLE_PREFIX";
/// Environment variable overriding [`DatabaseConfig::pool_size`].
pub const ENV_POOL_SIZE: &str = "RECORDSTORE_POOL_SIZE";

/// Default value of [`DatabaseConfig::pool_size`].
pub const DEFAULT_POOL_SIZE: usize = 1;

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file path, or `:memory:`.
    pub target: String,
    /// Prefix prepended to every registered table name.
    pub table_prefix: Option<String>,
    /// Requested connection count. Recorded only; one connection is used.
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl DatabaseConfig {
    /// Creates a configuration for the database at `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            table_prefix: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Creates a configuration for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_TARGET)
    }

    /// Sets the table name prefix. An empty prefix clears it.
    ///
    /// A prefix that does not keep table names plain identifiers is
    /// rejected when a table is created.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.table_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Sets the requested pool size.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Whether the target is an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.target == IN_MEMORY_TARGET
    }

    /// Parses the `[database]` table of a TOML document.
    ///
    /// A document without that table yields the in-memory defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the document is not valid TOML
    /// and [`Error::InvalidInput`] if a value is out of range or the table
    /// prefix is not identifier-safe.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be read or
    /// parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Applies `RECORDSTORE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `RECORDSTORE_POOL_SIZE` is not a
    /// positive integer or `RECORDSTORE_TABLE_PREFIX` is not
    /// identifier-safe.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`, keyed by the
    /// `RECORDSTORE_*` variable names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the pool size is not a positive
    /// integer or the table prefix is not identifier-safe.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(target) = lookup(ENV_DATABASE_FILE).filter(|v| !v.trim().is_empty()) {
            self.target = target;
        }
        if let Some(prefix) = lookup(ENV_TABLE_PREFIX) {
            self = self.with_table_prefix(check_table_prefix(ENV_TABLE_PREFIX, prefix)?);
        }
        if let Some(pool_size) = lookup(ENV_POOL_SIZE) {
            self.pool_size = parse_pool_size(pool_size.trim())?;
        }
        Ok(self)
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();
        let Some(database) = file.database else {
            return Ok(config);
        };

        if let Some(target) = database.file.or(database.dsn) {
            config.target = target;
        }
        if let Some(prefix) = database.table_prefix {
            config = config.with_table_prefix(check_table_prefix("database.table_prefix", prefix)?);
        }
        if let Some(pool_size) = database.pool_size {
            if pool_size == 0 {
                return Err(Error::InvalidInput(
                    "database.pool_size must be at least 1".to_string(),
                ));
            }
            config.pool_size = pool_size;
        }
        Ok(config)
    }
}

/// Accepts an empty prefix or one that starts a plain identifier.
fn check_table_prefix(source: &str, prefix: String) -> Result<String> {
    if prefix.is_empty() || is_identifier(&prefix) {
        Ok(prefix)
    } else {
        Err(Error::InvalidInput(format!(
            "{source} must contain only letters, digits and '_' and not start with a digit, got '{prefix}'"
        )))
    }
}

fn parse_pool_size(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(Error::InvalidInput(format!(
            "{ENV_POOL_SIZE} must be a positive integer, got '{raw}'"
        ))),
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    database: Option<ConfigFileDatabase>,
}

/// The `[database]` table.
#[derive(Debug, Deserialize, Default)]
struct ConfigFileDatabase {
    file: Option<String>,
    dsn: Option<String>,
    table_prefix: Option<String>,
    pool_size: Option<usize>,
}
