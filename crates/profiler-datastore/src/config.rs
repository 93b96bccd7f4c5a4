// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastore configuration
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Datastore configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Name of the in-process query server
    pub service_name: String,

    /// Directory holding durable namespaces
    pub datastore_dir: PathBuf,

    /// Delay between two poll cycles of a runner (milliseconds)
    pub poll_interval_ms: u64,

    /// Emit periodic self-reports
    pub report_enabled: bool,

    /// Delay before the first self-report (seconds)
    pub report_initial_delay_secs: u64,

    /// Delay between two self-reports (seconds)
    pub report_period_secs: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            service_name: "DataStoreService".to_string(),
            datastore_dir: PathBuf::from("."),
            poll_interval_ms: 250,
            report_enabled: true,
            report_initial_delay_secs: 15 * 60,
            report_period_secs: 60 * 60,
        }
    }
}

impl DatastoreConfig {
    /// Create a new config builder
    pub fn builder() -> DatastoreConfigBuilder {
        DatastoreConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.report_period_secs == 0 {
            return Err(ConfigError::Invalid("report_period_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn report_initial_delay(&self) -> Duration {
        Duration::from_secs(self.report_initial_delay_secs)
    }

    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period_secs)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct DatastoreConfigBuilder {
    service_name: Option<String>,
    datastore_dir: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    report_enabled: Option<bool>,
    report_initial_delay_secs: Option<u64>,
    report_period_secs: Option<u64>,
}

impl DatastoreConfigBuilder {
    /// Set the query server name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the directory for durable namespaces
    pub fn datastore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datastore_dir = Some(dir.into());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Enable or disable periodic self-reports (default: enabled)
    pub fn report_enabled(mut self, enabled: bool) -> Self {
        self.report_enabled = Some(enabled);
        self
    }

    pub fn report_initial_delay_secs(mut self, secs: u64) -> Self {
        self.report_initial_delay_secs = Some(secs);
        self
    }

    pub fn report_period_secs(mut self, secs: u64) -> Self {
        self.report_period_secs = Some(secs);
        self
    }

    /// Build the configuration
    pub fn build(self) -> DatastoreConfig {
        let defaults = DatastoreConfig::default();

        DatastoreConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            datastore_dir: self.datastore_dir.unwrap_or(defaults.datastore_dir),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            report_enabled: self.report_enabled.unwrap_or(defaults.report_enabled),
            report_initial_delay_secs: self
                .report_initial_delay_secs
                .unwrap_or(defaults.report_initial_delay_secs),
            report_period_secs: self
                .report_period_secs
                .unwrap_or(defaults.report_period_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DatastoreConfig::builder()
            .service_name("TestStore")
            .datastore_dir("/tmp/ds")
            .poll_interval_ms(10)
            .report_enabled(false)
            .build();

        assert_eq!(config.service_name, "TestStore");
        assert_eq!(config.datastore_dir, PathBuf::from("/tmp/ds"));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert!(!config.report_enabled);
        assert_eq!(config.report_period_secs, 3600);
    }

    #[test]
    fn test_config_defaults() {
        let config = DatastoreConfig::default();

        assert_eq!(config.service_name, "DataStoreService");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.report_initial_delay(), Duration::from_secs(900));
        assert_eq!(config.report_period(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_partial() {
        let config = DatastoreConfig::from_toml(
            r#"
            datastore_dir = "/var/lib/profiler"
            poll_interval_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.datastore_dir, PathBuf::from("/var/lib/profiler"));
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.service_name, "DataStoreService");
    }

    #[test]
    fn test_config_validation() {
        let err = DatastoreConfig::from_toml("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = DatastoreConfig::builder().service_name(" ").build().validate();
        assert!(err.is_err());

        assert!(matches!(
            DatastoreConfig::from_toml("poll_interval_ms = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = DatastoreConfig::builder().report_period_secs(60).build();
        let text = config.to_toml().unwrap();
        assert_eq!(DatastoreConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.toml");
        std::fs::write(&path, "service_name = \"FromFile\"\n").unwrap();

        let config = DatastoreConfig::from_file(&path).unwrap();
        assert_eq!(config.service_name, "FromFile");
        assert!(matches!(
            DatastoreConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
