/// Configuration management for ancla

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::balancer::RetryPolicy;
use crate::core::features::{FeatureToggles, LOAD_BALANCING, QUERY_CACHE};
use crate::host::HostSettings;

/// Longest time an actor may stay stuck to the primary after a write
pub const MAX_STICKING_EXPIRATION_SEC: u64 = 24 * 60 * 60;

/// Main ancla configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Replica hosts and routing limits
    pub load_balancing: LoadBalancingConfig,
    /// Write-location marker settings
    pub sticking: StickingConfig,
    /// Feature toggles
    pub features: FeatureConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Load balancing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    /// Replica addresses (host:port)
    pub hosts: Vec<String>,
    /// Unreplayed bytes a replica may have and still count as up to date
    pub max_replication_difference: u64,
    /// Replication lag a replica may have and still count as up to date
    pub max_replication_lag_time_sec: u64,
    /// Base interval between replica status checks
    pub replica_check_interval_sec: u64,
    /// Conflict retries allowed per host before falling back to the primary
    pub conflict_retry_factor: usize,
    /// Attempts against the primary on connection errors
    pub primary_retries: u32,
    /// First backoff delay against the primary, squared after each failure
    pub primary_retry_delay_sec: u64,
}

/// Sticking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StickingConfig {
    /// Lifetime of a write-location marker
    pub expiration_sec: u64,
    /// Prefix of marker keys in the shared cache
    pub key_prefix: String,
}

/// Feature toggle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Route reads to replicas and stick actors after writes
    pub load_balancing: bool,
    /// Enable the per-request query cache on pinned replica connections
    pub query_cache: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_balancing: LoadBalancingConfig::default(),
            sticking: StickingConfig::default(),
            features: FeatureConfig {
                load_balancing: true,
                query_cache: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            max_replication_difference: 8 * 1024 * 1024,
            max_replication_lag_time_sec: 60,
            replica_check_interval_sec: 60,
            conflict_retry_factor: 3,
            primary_retries: 3,
            primary_retry_delay_sec: 2,
        }
    }
}

impl Default for StickingConfig {
    fn default() -> Self {
        Self {
            expiration_sec: 30,
            key_prefix: "database-load-balancing/write-location".to_string(),
        }
    }
}

impl LoadBalancingConfig {
    /// Replica health thresholds derived from this configuration
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            max_replication_difference: self.max_replication_difference,
            max_replication_lag_time: Duration::from_secs(self.max_replication_lag_time_sec),
            replica_check_interval: Duration::from_secs(self.replica_check_interval_sec),
        }
    }

    /// Retry limits derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            conflict_retry_factor: self.conflict_retry_factor,
            primary_retries: self.primary_retries,
            primary_retry_delay: Duration::from_secs(self.primary_retry_delay_sec),
        }
    }
}

impl StickingConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_sec)
    }
}

impl FeatureToggles for FeatureConfig {
    fn enabled(&self, name: &str) -> bool {
        match name {
            LOAD_BALANCING => self.load_balancing,
            QUERY_CACHE => self.query_cache,
            _ => false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lb = &self.load_balancing;

        for host in &lb.hosts {
            validate_host_address(host)?;
        }

        if lb.replica_check_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "replica_check_interval_sec must be greater than 0".to_string(),
            ));
        }

        if lb.conflict_retry_factor == 0 {
            return Err(ConfigError::ValidationError(
                "conflict_retry_factor must be greater than 0".to_string(),
            ));
        }

        if lb.primary_retries == 0 {
            return Err(ConfigError::ValidationError(
                "primary_retries must be greater than 0".to_string(),
            ));
        }

        // Delay is squared after each attempt; must stay >= 1s to grow
        if lb.primary_retry_delay_sec == 0 {
            return Err(ConfigError::ValidationError(
                "primary_retry_delay_sec must be greater than 0".to_string(),
            ));
        }

        if self.sticking.expiration_sec == 0 {
            return Err(ConfigError::ValidationError(
                "sticking expiration_sec must be greater than 0".to_string(),
            ));
        }

        if self.sticking.expiration_sec > MAX_STICKING_EXPIRATION_SEC {
            return Err(ConfigError::ValidationError(format!(
                "sticking expiration_sec must be at most {}",
                MAX_STICKING_EXPIRATION_SEC
            )));
        }

        if self.sticking.key_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sticking key_prefix cannot be empty".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            load_balancing: LoadBalancingConfig {
                hosts: vec![
                    "10.0.2.10:5432".to_string(),
                    "10.0.2.11:5432".to_string(),
                    "10.0.2.12:5432".to_string(),
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

fn validate_host_address(host: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::ValidationError(
        format!("Invalid replica host '{}': must be host:port", host)
    );

    let (name, port) = host.rsplit_once(':').ok_or_else(invalid)?;
    if name.trim().is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;

    Ok(())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sticking.expiration(), Duration::from_secs(30));
        assert_eq!(config.load_balancing.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.load_balancing.primary_retries = 0;
        assert!(config.validate().is_err());

        config.load_balancing.primary_retries = 3;
        config.load_balancing.hosts = vec!["replica-1.db.internal:5432".to_string()];
        assert!(config.validate().is_ok());

        config.load_balancing.hosts = vec!["replica-1.db.internal".to_string()];
        assert!(config.validate().is_err());

        config.load_balancing.hosts = vec![":5432".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sticking_expiration_is_bounded() {
        let mut config = Config::default();

        config.sticking.expiration_sec = MAX_STICKING_EXPIRATION_SEC;
        assert!(config.validate().is_ok());

        config.sticking.expiration_sec = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_feature_toggles_from_config() {
        let mut features = Config::default().features;
        assert!(features.enabled(LOAD_BALANCING));
        assert!(features.enabled(QUERY_CACHE));
        assert!(!features.enabled("unknown_flag"));

        features.query_cache = false;
        assert!(!features.enabled(QUERY_CACHE));
    }

    #[test]
    fn test_config_file_operations() {
        let temp_file = NamedTempFile::new().unwrap();

        Config::create_example_config(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config.load_balancing.hosts.len(), 3);
        assert_eq!(loaded_config.load_balancing.host_settings().max_replication_difference, 8 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_log_level_rejected_on_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        config.save_to_file(temp_file.path()).unwrap();

        let result = Config::load_from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
