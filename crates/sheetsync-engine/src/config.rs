//! Process configuration
//!
//! Everything comes from the environment (optionally seeded from `.env`).
//! The per-table sync configuration lives in the sources file, see
//! [`crate::sources`].

use crate::db::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default sources file
pub const DEFAULT_SOURCES_PATH: &str = "sources.yml";

/// Default directory of `<entity>.json` contracts
pub const DEFAULT_CONTRACTS_DIR: &str = "contracts";

/// Default directory for the lock file
pub const DEFAULT_LOCK_DIR: &str = "logs";

/// Default lock name, the file is `<lock_dir>/<lock_name>.lock`
pub const DEFAULT_LOCK_NAME: &str = "sheetsync";

/// Spreadsheet API root
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Per-request timeout for the spreadsheet API
pub const DEFAULT_SHEETS_TIMEOUT_SECS: u64 = 30;

/// Attempts per spreadsheet API call (first try included)
pub const DEFAULT_SHEETS_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff step: attempt N waits N times this
pub const DEFAULT_SHEETS_RETRY_BASE_DELAY_SECS: u64 = 5;

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    pub sheets: SheetsConfig,
    pub paths: PathsConfig,
}

/// Spreadsheet API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_secs: u64,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub sources: PathBuf,
    pub contracts_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub lock_name: String,
    /// Directory of `*.sql` transform scripts run after the load phase
    pub transform_dir: Option<PathBuf>,
}

impl SheetsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load `.env` (if any), read the environment and validate
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read the environment without touching `.env`
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database: DbConfig::from_env()?,
            sheets: SheetsConfig {
                api_base: std::env::var("SHEETS_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_SHEETS_API_BASE.to_string()),
                api_key: env_opt("SHEETS_API_KEY"),
                access_token: env_opt("SHEETS_ACCESS_TOKEN"),
                timeout_secs: env_or("SHEETS_TIMEOUT_SECS", DEFAULT_SHEETS_TIMEOUT_SECS),
                retry_attempts: env_or("SHEETS_RETRY_ATTEMPTS", DEFAULT_SHEETS_RETRY_ATTEMPTS),
                retry_base_delay_secs: env_or(
                    "SHEETS_RETRY_BASE_DELAY_SECS",
                    DEFAULT_SHEETS_RETRY_BASE_DELAY_SECS,
                ),
            },
            paths: PathsConfig {
                sources: env_or("SHEETSYNC_SOURCES", PathBuf::from(DEFAULT_SOURCES_PATH)),
                contracts_dir: env_or(
                    "SHEETSYNC_CONTRACTS_DIR",
                    PathBuf::from(DEFAULT_CONTRACTS_DIR),
                ),
                lock_dir: env_or("SHEETSYNC_LOCK_DIR", PathBuf::from(DEFAULT_LOCK_DIR)),
                lock_name: std::env::var("SHEETSYNC_LOCK_NAME")
                    .unwrap_or_else(|_| DEFAULT_LOCK_NAME.to_string()),
                transform_dir: env_opt("SHEETSYNC_TRANSFORM_DIR").map(PathBuf::from),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sheets.retry_attempts == 0 {
            anyhow::bail!("SHEETS_RETRY_ATTEMPTS must be at least 1");
        }

        if self.sheets.timeout_secs == 0 {
            anyhow::bail!("SHEETS_TIMEOUT_SECS must be greater than 0");
        }

        if self.paths.lock_name.is_empty()
            || self.paths.lock_name.contains(std::path::MAIN_SEPARATOR)
        {
            anyhow::bail!("SHEETSYNC_LOCK_NAME must be a plain file name");
        }

        if self.sheets.api_key.is_none() && self.sheets.access_token.is_none() {
            tracing::warn!(
                "Neither SHEETS_API_KEY nor SHEETS_ACCESS_TOKEN is set - spreadsheet requests will be anonymous"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            sheets: SheetsConfig {
                api_base: DEFAULT_SHEETS_API_BASE.to_string(),
                api_key: None,
                access_token: None,
                timeout_secs: DEFAULT_SHEETS_TIMEOUT_SECS,
                retry_attempts: DEFAULT_SHEETS_RETRY_ATTEMPTS,
                retry_base_delay_secs: DEFAULT_SHEETS_RETRY_BASE_DELAY_SECS,
            },
            paths: PathsConfig {
                sources: PathBuf::from(DEFAULT_SOURCES_PATH),
                contracts_dir: PathBuf::from(DEFAULT_CONTRACTS_DIR),
                lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
                lock_name: DEFAULT_LOCK_NAME.to_string(),
                transform_dir: None,
            },
        }
    }
}
