//! Engine configuration via `sluice.toml`
//!
//! Every field has a default, so an empty file is a valid configuration
//! that opens a private in-memory SQLite database. Values are validated
//! eagerly when a file is loaded.

use serde::{Deserialize, Serialize};
use sluice_concurrency::{PoolConfig, TransactionOptions};
use sluice_core::IsolationLevel;
use sluice_driver::ConnectionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name looked up by callers that keep one next to their data
pub const CONFIG_FILE_NAME: &str = "sluice.toml";

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written
    #[error("failed to write config file '{}': {source}", path.display())]
    Write {
        /// File that was written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or has fields of the wrong type
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be rendered as TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds a value outside its accepted range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The datasource could not be opened
    #[error("failed to open datasource '{url}': {reason}")]
    Datasource {
        /// Configured URL
        url: String,
        /// Driver message
        reason: String,
    },
}

/// `[datasource]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceConfig {
    /// Connection URL (`sqlite::memory:`, `sqlite:/path/to/file.db`)
    pub url: String,
    /// Per-statement timeout in milliseconds; backend default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        DatasourceConfig {
            url: "sqlite::memory:".to_string(),
            statement_timeout_ms: None,
        }
    }
}

/// `[pool]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum connections checked out at once
    pub max_connections: usize,
    /// How long a checkout waits before failing with a pool-exhausted error
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 10,
            acquire_timeout_ms: 10_000,
        }
    }
}

/// `[transaction]` section, defaults for interactive transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Isolation level applied at BEGIN (`ReadCommitted`, `Serializable`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<String>,
    /// How long `start` waits for a connection
    pub max_wait_ms: u64,
    /// Idle time after which an open transaction is rolled back
    pub idle_timeout_ms: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        TransactionSettings {
            isolation_level: None,
            max_wait_ms: 2_000,
            idle_timeout_ms: 5_000,
        }
    }
}

/// Engine configuration loaded from `sluice.toml`
///
/// # Example
///
/// ```toml
/// [datasource]
/// url = "sqlite:/var/lib/app/data.db"
///
/// [pool]
/// max_connections = 4
///
/// [transaction]
/// isolation_level = "Serializable"
/// idle_timeout_ms = 10000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where to connect
    pub datasource: DatasourceConfig,
    /// Pool sizing
    pub pool: PoolSettings,
    /// Interactive transaction defaults
    pub transaction: TransactionSettings,
}

impl EngineConfig {
    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Sluice engine configuration

[datasource]
# sqlite::memory: opens a private in-memory database per engine.
url = "sqlite::memory:"
# statement_timeout_ms = 5000

[pool]
max_connections = 10
# Checkout wait before a pool-exhausted error.
acquire_timeout_ms = 10000

[transaction]
# One of ReadUncommitted, ReadCommitted, RepeatableRead, Snapshot,
# Serializable; must be supported by the backend.
# isolation_level = "Serializable"
max_wait_ms = 2000
idle_timeout_ms = 5000
"#
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field's range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasource.url.trim().is_empty() {
            return Err(invalid("datasource.url", "must not be empty"));
        }
        if self.datasource.statement_timeout_ms == Some(0) {
            return Err(invalid("datasource.statement_timeout_ms", "must be positive"));
        }
        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "must be at least 1"));
        }
        if self.pool.acquire_timeout_ms == 0 {
            return Err(invalid("pool.acquire_timeout_ms", "must be positive"));
        }
        if self.transaction.max_wait_ms == 0 {
            return Err(invalid("transaction.max_wait_ms", "must be positive"));
        }
        if self.transaction.idle_timeout_ms == 0 {
            return Err(invalid("transaction.idle_timeout_ms", "must be positive"));
        }
        self.isolation_level()?;
        Ok(())
    }

    /// Parsed `[transaction] isolation_level`
    pub fn isolation_level(&self) -> Result<Option<IsolationLevel>, ConfigError> {
        match &self.transaction.isolation_level {
            None => Ok(None),
            Some(raw) => raw
                .parse::<IsolationLevel>()
                .map(Some)
                .map_err(|level| invalid("transaction.isolation_level", format!("unknown level '{level}'"))),
        }
    }

    /// Settings handed to the driver adapter
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.datasource.url.clone(),
            statement_timeout: self.datasource.statement_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Pool sizing
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.pool.max_connections,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
        }
    }

    /// Defaults for interactive transactions
    pub fn transaction_options(&self) -> Result<TransactionOptions, ConfigError> {
        Ok(TransactionOptions {
            isolation_level: self.isolation_level()?,
            max_wait: Duration::from_millis(self.transaction.max_wait_ms),
            idle_timeout: Duration::from_millis(self.transaction.idle_timeout_ms),
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
