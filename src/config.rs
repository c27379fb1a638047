use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Upper bound for lease and stale-timeout settings (one year).
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Runtime configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Base URL of the Document Registry; an in-memory registry is used when unset.
    pub registry_url: Option<String>,
    /// Optional bearer token sent to the Document Registry.
    pub registry_api_key: Option<String>,
    /// Lease granted to claims that do not specify one.
    pub default_lease_seconds: u64,
    /// Age after which an unleased `processing` stage is failed by the sweep.
    pub stale_stage_timeout_seconds: u64,
    /// Period of the background sweep; `0` disables it.
    pub sweep_interval_seconds: u64,
    /// Page size for claimable-document queries when callers omit one.
    pub claimable_default_limit: usize,
    /// Upper bound applied to claimable-document page sizes.
    pub claimable_max_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: None,
            registry_url: None,
            registry_api_key: None,
            default_lease_seconds: 300,
            stale_stage_timeout_seconds: 3600,
            sweep_interval_seconds: 60,
            claimable_default_limit: 25,
            claimable_max_limit: 200,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            server_port: parse_optional("SERVER_PORT")?,
            registry_url: load_env_optional("REGISTRY_URL"),
            registry_api_key: load_env_optional("REGISTRY_API_KEY"),
            default_lease_seconds: parse_optional("DEFAULT_LEASE_SECONDS")?
                .unwrap_or(defaults.default_lease_seconds),
            stale_stage_timeout_seconds: parse_optional("STALE_STAGE_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.stale_stage_timeout_seconds),
            sweep_interval_seconds: parse_optional("SWEEP_INTERVAL_SECONDS")?
                .unwrap_or(defaults.sweep_interval_seconds),
            claimable_default_limit: parse_optional("CLAIMABLE_DEFAULT_LIMIT")?
                .unwrap_or(defaults.claimable_default_limit),
            claimable_max_limit: parse_optional("CLAIMABLE_MAX_LIMIT")?
                .unwrap_or(defaults.claimable_max_limit),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DURATION_SECONDS).contains(&self.default_lease_seconds) {
            return Err(ConfigError::InvalidValue("DEFAULT_LEASE_SECONDS".into()));
        }
        if !(1..=MAX_DURATION_SECONDS).contains(&self.stale_stage_timeout_seconds) {
            return Err(ConfigError::InvalidValue("STALE_STAGE_TIMEOUT_SECONDS".into()));
        }
        if self.claimable_max_limit == 0 {
            return Err(ConfigError::InvalidValue("CLAIMABLE_MAX_LIMIT".into()));
        }
        if self.claimable_default_limit == 0
            || self.claimable_default_limit > self.claimable_max_limit
        {
            return Err(ConfigError::InvalidValue("CLAIMABLE_DEFAULT_LIMIT".into()));
        }
        Ok(())
    }

    /// Clamp a caller-supplied page size into the configured bounds.
    pub fn claimable_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.claimable_default_limit)
            .clamp(1, self.claimable_max_limit)
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        server_port = ?config.server_port,
        registry_url = ?config.registry_url,
        default_lease_seconds = config.default_lease_seconds,
        stale_stage_timeout_seconds = config.stale_stage_timeout_seconds,
        sweep_interval_seconds = config.sweep_interval_seconds,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimable_limit_clamps_to_bounds() {
        let config = Config::default();
        assert_eq!(config.claimable_limit(None), 25);
        assert_eq!(config.claimable_limit(Some(0)), 1);
        assert_eq!(config.claimable_limit(Some(10_000)), 200);
        assert_eq!(config.claimable_limit(Some(7)), 7);
    }

    #[test]
    fn validate_bounds_durations() {
        assert!(Config::default().validate().is_ok());

        let huge_lease = Config {
            default_lease_seconds: u64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            huge_lease.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "DEFAULT_LEASE_SECONDS"
        ));

        let huge_timeout = Config {
            stale_stage_timeout_seconds: MAX_DURATION_SECONDS + 1,
            ..Config::default()
        };
        assert!(matches!(
            huge_timeout.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "STALE_STAGE_TIMEOUT_SECONDS"
        ));

        let zero_lease = Config {
            default_lease_seconds: 0,
            ..Config::default()
        };
        assert!(zero_lease.validate().is_err());
    }
}
