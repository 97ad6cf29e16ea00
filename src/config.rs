//! Configuration management for the service monitor

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the persisted documents
    pub data_dir: PathBuf,

    /// Key (file stem) the service collection is stored under
    pub storage_key: String,

    /// Transport-level timeout applied to every probe
    pub probe_timeout: Duration,

    /// Populate the example services when the store starts empty
    pub seed_examples: bool,

    /// Output format of the log subscriber
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".service-monitor"),
            storage_key: "services".to_string(),
            probe_timeout: Duration::from_secs(30),
            seed_examples: true,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(data_dir) = env::var("SERVICE_MONITOR_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(storage_key) = env::var("SERVICE_MONITOR_STORAGE_KEY") {
            config.storage_key = storage_key;
        }

        if let Ok(timeout) = env::var("PROBE_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.probe_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(seed) = env::var("SEED_EXAMPLES") {
            config.seed_examples = !matches!(seed.to_lowercase().as_str(), "0" | "false" | "off");
        }

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.log_format = LogFormat::from(format.as_str());
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir cannot be empty".to_string());
        }

        if self.storage_key.trim().is_empty() {
            return Err("storage_key cannot be empty".to_string());
        }

        if self
            .storage_key
            .contains(|c: char| c == '/' || c == '\\' || c == '.')
        {
            return Err("storage_key must be a plain name without separators or dots".to_string());
        }

        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
