//! Configuration management for the sync agent.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use vestry_engine::RetryPolicy;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the durable mirror and pending log
    pub data_dir: PathBuf,
    /// PostgreSQL connection URL of the remote store
    pub database_url: String,
    /// How often the remote's reachability is checked
    pub probe_interval: Duration,
    /// Handling of entries that fail to replay
    pub retry: RetryPolicy,
    /// Entity types refreshed at startup
    pub entity_types: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("VESTRY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./vestry-data"));

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let probe_secs: u64 = lookup("VESTRY_PROBE_INTERVAL_SECS")
            .unwrap_or_else(|| "15".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidProbeInterval)?;
        if probe_secs == 0 {
            return Err(ConfigError::InvalidProbeInterval);
        }

        let retry = match lookup("VESTRY_MAX_REPLAY_ATTEMPTS") {
            None => RetryPolicy::Drop,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) => RetryPolicy::Drop,
                Ok(max_attempts) => RetryPolicy::Requeue { max_attempts },
                Err(_) => return Err(ConfigError::InvalidMaxAttempts(raw)),
            },
        };

        let entity_types: Vec<String> = lookup("VESTRY_ENTITY_TYPES")
            .unwrap_or_else(|| "members".to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        if entity_types.is_empty() {
            return Err(ConfigError::NoEntityTypes);
        }

        Ok(Self {
            data_dir,
            database_url,
            probe_interval: Duration::from_secs(probe_secs),
            retry,
            entity_types,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid VESTRY_PROBE_INTERVAL_SECS value")]
    InvalidProbeInterval,

    #[error("Invalid VESTRY_MAX_REPLAY_ATTEMPTS value: {0}")]
    InvalidMaxAttempts(String),

    #[error("VESTRY_ENTITY_TYPES names no entity type")]
    NoEntityTypes,
}
