use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Environment prefix for configuration overrides, e.g. `PURGER__HTTP__LISTEN`
pub const ENV_PREFIX: &str = "PURGER__";

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "purger.toml";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Socket address the delete request API listens on
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: String::from("0.0.0.0:3100"),
        }
    }
}

/// Backend implementing the indexed key/value contract
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Process-local ordered map, lost on restart
    Memory,
    /// SQLite database (file or `sqlite::memory:`)
    Sqlite,
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Data source name, only used by the sqlite backend
    pub dsn: String,
    /// Maximum number of rows delivered per page of a scan
    pub page_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Sqlite,
            dsn: String::from("sqlite://.data/index.db"),
            page_size: 100,
        }
    }
}

impl IndexConfig {
    /// Create an in-memory index configuration, handy for tests and single-node trials
    pub fn in_memory() -> Self {
        Self {
            backend: IndexBackend::Memory,
            dsn: String::from("sqlite::memory:"),
            page_size: 100,
        }
    }
}

/// Configuration of the delete request store and the tombstones loader
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteStoreConfig {
    /// Name of the table which stores delete requests
    pub requests_table_name: String,
    /// Period between two reloads of the cached tombstones
    #[serde(with = "humantime_serde")]
    pub tombstones_reload_interval: Duration,
    /// Deadline for loading the pending tombstones of one tenant
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,
}

impl Default for DeleteStoreConfig {
    fn default() -> Self {
        Self {
            requests_table_name: String::from("delete_requests"),
            tombstones_reload_interval: Duration::from_secs(15 * 60),
            load_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// HTTP API configuration
    pub http: HttpConfig,
    /// Indexed key/value backend configuration
    pub index: IndexConfig,
    /// Delete request handling
    pub deletes: DeleteStoreConfig,
}

/// Reasons a configuration is rejected by [`Configuration::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyTableName,
    ZeroReloadInterval,
    ZeroPageSize,
    EmptyDsn,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTableName => write!(f, "deletes.requests_table_name cannot be empty"),
            Self::ZeroReloadInterval => {
                write!(f, "deletes.tombstones_reload_interval must be positive")
            }
            Self::ZeroPageSize => write!(f, "index.page_size must be positive"),
            Self::EmptyDsn => write!(f, "index.dsn cannot be empty for the sqlite backend"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deletes.requests_table_name.is_empty() {
            return Err(ConfigError::EmptyTableName);
        }
        if self.deletes.tombstones_reload_interval.is_zero() {
            return Err(ConfigError::ZeroReloadInterval);
        }
        if self.index.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.index.backend == IndexBackend::Sqlite && self.index.dsn.is_empty() {
            return Err(ConfigError::EmptyDsn);
        }
        Ok(())
    }
}
