//! Configuration loading: TOML file with environment variable overrides.
//!
//! Reads `uhab.toml` from the working directory, or the file named by
//! `UHAB_CONFIG`. Every section has defaults so the file is optional; a hub
//! without `[[items]]` simply has nothing to do. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use uhab_adapter_dmx::DmxConfig;
use uhab_adapter_modbus::ModbusConfig;
use uhab_app::config::BusConfig;
use uhab_domain::item::ItemDefinition;
use uhab_domain::rule::RuleDefinition;

const DEFAULT_PATH: &str = "uhab.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub persistence: PersistenceConfig,
    pub dmx: DmxConfig,
    pub modbus: ModbusConfig,
    #[serde(rename = "virtual")]
    pub virtual_binding: VirtualConfig,
    pub items: Vec<ItemDefinition>,
    pub rules: Vec<RuleDefinition>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Item state snapshots.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Seconds between two snapshots.
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VirtualConfig {
    pub enabled: bool,
}

impl Config {
    /// Load configuration from `UHAB_CONFIG` or `uhab.toml` (if present)
    /// then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed or fails
    /// validation.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("UHAB_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("UHAB_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("UHAB_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.queue_size == 0 {
            return Err(ConfigError::Validation("bus.queue_size must be non-zero".to_string()));
        }
        if self.persistence.enabled && self.persistence.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "persistence.interval_secs must be non-zero".to_string(),
            ));
        }
        self.dmx
            .validate()
            .map_err(|err| ConfigError::Validation(format!("dmx: {err}")))?;
        self.modbus
            .validate()
            .map_err(|err| ConfigError::Validation(format!("modbus: {err}")))?;
        for item in &self.items {
            item.validate()
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn persistence_interval(&self) -> Duration {
        Duration::from_secs(self.persistence.interval_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "uhabd=info,uhab=info".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:uhab.db?mode=rwc".to_string(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
