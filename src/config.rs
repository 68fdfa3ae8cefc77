//! Configuration management with validation and defaults
//!
//! Loaded from TOML, then overridden from `ESCROW_*` environment variables.

use crate::errors::ConfigurationError;
use crate::escrow::types::Address;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EscrowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Addresses and limits the engine is constructed with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub custody: Address,
    pub treasury: Address,
    pub burn_sink: Address,
    pub global_admin: Address,
    /// Minimum seconds between two entries by the same player; 0 disables
    pub rate_limit_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            custody: Address::from_label("custody"),
            treasury: Address::from_label("treasury"),
            burn_sink: Address::from_label("burn"),
            global_admin: Address::from_label("admin"),
            rate_limit_interval_secs: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub compression_type: CompressionType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/escrow_data".to_string(),
            write_buffer_size_mb: 64,
            compression_type: CompressionType::Lz4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
        }
    }
}

impl EscrowConfig {
    /// No rate limit, verbose logs
    pub fn testing() -> Self {
        Self {
            engine: EngineConfig {
                rate_limit_interval_secs: 0,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
            },
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self {
            engine: EngineConfig {
                rate_limit_interval_secs: 30,
                ..Default::default()
            },
            storage: StorageConfig {
                write_buffer_size_mb: 256,
                compression_type: CompressionType::Zstd,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let engine = &self.engine;
        let named = [
            ("engine.custody", engine.custody),
            ("engine.treasury", engine.treasury),
            ("engine.burn_sink", engine.burn_sink),
            ("engine.global_admin", engine.global_admin),
        ];
        for (field, address) in named {
            if address.is_zero() {
                return Err(ConfigurationError::InvalidValue {
                    field: field.to_string(),
                    value: address.to_hex(),
                    reason: "null address".to_string(),
                });
            }
        }

        if engine.custody == engine.treasury || engine.custody == engine.burn_sink {
            return Err(ConfigurationError::ValidationFailed(
                "custody must differ from treasury and burn sink".to_string(),
            ));
        }

        if self.storage.write_buffer_size_mb == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "write_buffer_size_mb must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.engine.rate_limit_interval_secs)
    }

    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|e| ConfigurationError::LoadFailed(e.to_string()))
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// File (or defaults), then environment, then validation
    pub fn load(&self) -> Result<EscrowConfig, ConfigurationError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EscrowConfig::default(),
        };

        Self::apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<EscrowConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_overrides<F>(config: &mut EscrowConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("ESCROW_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Some(secs) = lookup("ESCROW_RATE_LIMIT_SECS") {
            config.engine.rate_limit_interval_secs =
                secs.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "ESCROW_RATE_LIMIT_SECS".to_string(),
                    value: secs.clone(),
                    reason: "Invalid integer".to_string(),
                })?;
        }
        if let Some(treasury) = lookup("ESCROW_TREASURY") {
            config.engine.treasury =
                treasury.parse().map_err(|reason| ConfigurationError::InvalidValue {
                    field: "ESCROW_TREASURY".to_string(),
                    value: treasury.clone(),
                    reason,
                })?;
        }
        if let Some(level) = lookup("ESCROW_LOG_LEVEL") {
            config.monitoring.log_level =
                level.parse().map_err(|reason| ConfigurationError::InvalidValue {
                    field: "ESCROW_LOG_LEVEL".to_string(),
                    value: level.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_presets_are_valid() {
        assert!(EscrowConfig::default().validate().is_ok());
        assert!(EscrowConfig::testing().validate().is_ok());
        assert!(EscrowConfig::production().validate().is_ok());
    }

    #[test]
    fn test_null_treasury_rejected() {
        let mut config = EscrowConfig::default();
        config.engine.treasury = Address::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "engine.treasury"
        ));
    }

    #[test]
    fn test_custody_must_be_distinct() {
        let mut config = EscrowConfig::default();
        config.engine.treasury = config.engine.custody;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EscrowConfig::production();
        let text = config.to_toml().unwrap();
        let parsed: EscrowConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: EscrowConfig = toml::from_str(
            "[monitoring]\nlog_level = \"warn\"\n",
        )
        .unwrap();
        assert_eq!(parsed.monitoring.log_level, LogLevel::Warn);
        assert_eq!(parsed.engine, EngineConfig::default());
    }

    #[test]
    fn test_partial_section_fills_missing_fields() {
        let parsed: EscrowConfig = toml::from_str(
            "[engine]\nrate_limit_interval_secs = 30\n\n[storage]\nwrite_buffer_size_mb = 8\n",
        )
        .unwrap();
        assert_eq!(parsed.engine.rate_limit_interval_secs, 30);
        assert_eq!(parsed.engine.treasury, EngineConfig::default().treasury);
        assert_eq!(parsed.storage.write_buffer_size_mb, 8);
        assert_eq!(parsed.storage.data_directory, StorageConfig::default().data_directory);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ESCROW_DATA_DIR", "/tmp/escrow"),
            ("ESCROW_RATE_LIMIT_SECS", "12"),
            ("ESCROW_LOG_LEVEL", "TRACE"),
        ]
        .into_iter()
        .collect();

        let mut config = EscrowConfig::default();
        ConfigLoader::apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.storage.data_directory, "/tmp/escrow");
        assert_eq!(config.rate_limit_interval(), Duration::from_secs(12));
        assert_eq!(config.monitoring.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_bad_env_override() {
        let mut config = EscrowConfig::default();
        let result = ConfigLoader::apply_overrides(&mut config, |k| {
            (k == "ESCROW_RATE_LIMIT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }
}
