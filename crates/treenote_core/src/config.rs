//! Core configuration.
//!
//! # Invariants
//! - Every field has a default, so partial JSON documents load.
//! - `validate` runs before any value is used to open storage or logs.

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "TREENOTE_LOG_LEVEL";
pub const DEFAULT_MAX_IMPORT_NODES: usize = 50_000;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "config read failed: {err}"),
            Self::Json(err) => write!(f, "config parse failed: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
    /// Primary SQLite database file.
    pub database_path: PathBuf,
    /// Plain JSON document used when the primary store fails.
    pub fallback_path: PathBuf,
    /// Upper bound on nodes accepted from one import document.
    pub max_import_nodes: usize,
    /// Drop attachment metadata whose blob did not materialize after import.
    pub sweep_orphans_on_import: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: std::env::temp_dir().join("treenote").join("logs"),
            database_path: PathBuf::from("treenote.db"),
            fallback_path: PathBuf::from("treenote.json"),
            max_import_nodes: DEFAULT_MAX_IMPORT_NODES,
            sweep_orphans_on_import: true,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, applies environment overrides, and validates.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.trim().is_empty() {
                self.log_level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.log_level).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        for (name, path) in [
            ("log_dir", &self.log_dir),
            ("database_path", &self.database_path),
            ("fallback_path", &self.fallback_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("`{name}` cannot be empty")));
            }
        }
        if self.max_import_nodes == 0 {
            return Err(ConfigError::Invalid(
                "`max_import_nodes` must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, DEFAULT_MAX_IMPORT_NODES};
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = CoreConfig::from_json_str(r#"{"database_path": "/data/notes.db"}"#).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/notes.db"));
        assert_eq!(config.max_import_nodes, DEFAULT_MAX_IMPORT_NODES);
        assert!(config.sweep_orphans_on_import);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let err = CoreConfig::from_json_str(r#"{"log_level": "chatty"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("chatty")));

        let err = CoreConfig::from_json_str(r#"{"max_import_nodes": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CoreConfig::from_json_str(r#"{"fallback_path": ""}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("fallback_path")));

        assert!(matches!(
            CoreConfig::from_json_str("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sweep_orphans_on_import": false, "log_level": "warn"}}"#).unwrap();
        let config = CoreConfig::from_file(file.path()).unwrap();
        assert!(!config.sweep_orphans_on_import);
        assert!(matches!(
            CoreConfig::from_file("/nonexistent/treenote.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
