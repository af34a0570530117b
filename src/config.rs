//! Configuration loading
//!
//! Every section is optional in the TOML file; missing values fall back to
//! the component defaults. Durations are written in milliseconds.

use crate::broker::{BrokerConfig, ResponderConfig, RetentionConfig};
use crate::recovery::RecoveryConfig;
use crate::sensor::SensorConfig;
use crate::transport::Topics;
use crate::validator::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Bad config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub topics: Topics,
    pub retention: RetentionConfig,
    pub responder: ResponderConfig,
    pub recovery: RecoveryConfig,
    pub sensor: SensorConfig,
    pub validator: ValidatorConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retention.capacity == 0 {
            return Err(ConfigError::Invalid("retention.capacity must be positive".into()));
        }
        if self.responder.page_size == 0 {
            return Err(ConfigError::Invalid("responder.page_size must be positive".into()));
        }
        if self.responder.max_pages == 0 {
            return Err(ConfigError::Invalid("responder.max_pages must be positive".into()));
        }
        if self.recovery.activity_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "recovery.activity_timeout_ms must be positive".into(),
            ));
        }
        if self.sensor.interval.is_zero() {
            return Err(ConfigError::Invalid("sensor.interval_ms must be positive".into()));
        }

        let topics = [
            &self.topics.system,
            &self.topics.measurement,
            &self.topics.recovery,
        ];
        if topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::Invalid("topic names must not be empty".into()));
        }
        if topics[0] == topics[1] || topics[0] == topics[2] || topics[1] == topics[2] {
            return Err(ConfigError::Invalid("topic names must be distinct".into()));
        }

        Ok(())
    }

    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            retention: self.retention.clone(),
            responder: self.responder.clone(),
        }
    }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
