//! Indexer configuration file.

use std::path::{Path, PathBuf};

use ember_engine::{CollateralGate, EngineConfig, RateConfig};
use ember_types::{Address, Amount, Id, Timestamp};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// Complete indexer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Accrual behavior.
    #[serde(default)]
    pub accrual: AccrualConfig,
    /// Reward eligibility.
    #[serde(default)]
    pub rewards: RewardsConfig,
    /// Event log decoding.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Epoch schedule, in order.
    #[serde(default)]
    pub epochs: Vec<EpochConfig>,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Relative paths resolve against the data directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualConfig {
    #[serde(default)]
    pub collateral_gate: CollateralGate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Markets whose events are indexed. Absent = every market.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_markets: Option<Vec<Id>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Lending protocol address. Vault share transfers to or from it are
    /// collateral moves, already carried by the lending events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lending_protocol: Option<Address>,
}

/// One epoch of the out-of-band schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub rates: Vec<EpochRate>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRate {
    pub market: Id,
    #[serde_as(as = "DisplayFromStr")]
    pub rate_per_second: Amount,
}

fn default_database_path() -> String {
    "ember.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EpochConfig {
    pub fn rate_configs(&self) -> Vec<RateConfig> {
        self.rates
            .iter()
            .map(|r| RateConfig {
                market: r.market,
                rate_per_second: r.rate_per_second,
            })
            .collect()
    }
}

impl IndexerConfig {
    /// Load configuration from `EMBER_CONFIG` or the data directory.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            collateral_gate: self.accrual.collateral_gate,
        }
    }

    /// Resolved database file path.
    pub fn database_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.storage.database_path);
        if path.is_absolute() {
            path
        } else {
            Self::data_dir().join(path)
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("EMBER_CONFIG") {
            return PathBuf::from(path);
        }
        Self::data_dir().join("config.toml")
    }

    /// `$EMBER_DATA_DIR`, else `~/.ember`.
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("EMBER_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".ember"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/ember"))
    }
}
