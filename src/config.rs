//! Configuration.
//!
//! Loaded from TOML. Every section is optional:
//!
//! ```toml
//! [file_events]
//! activation = "next_iteration"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub file_events: FileEventConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Readiness event configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEventConfig {
    /// Delivery of injected readiness events.
    #[serde(default)]
    pub activation: ActivationMode,
}

/// When a callback sees readiness injected with `activate`.
///
/// Accepts: "next_iteration", "next", "deferred", "immediate", "sync"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Invoke the callback synchronously, and again with the merged events
    /// on the next loop iteration.
    #[serde(alias = "sync")]
    Immediate,
    /// Invoke the callback only with the merged events on the next loop
    /// iteration (default).
    #[default]
    #[serde(alias = "next", alias = "deferred")]
    NextIteration,
}

impl FromStr for ActivationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" | "sync" => Ok(ActivationMode::Immediate),
            "next_iteration" | "next-iteration" | "next" | "deferred" => {
                Ok(ActivationMode::NextIteration)
            }
            other => Err(format!("unknown activation mode: {other}")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level filter, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    #[serde(default = "default_true")]
    pub target: bool,

    #[serde(default)]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: true,
            thread_names: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.file_events.activation, ActivationMode::NextIteration);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.logging.timestamps);
        assert!(config.logging.target);
        assert!(!config.logging.thread_names);
    }

    #[test]
    fn test_parse() {
        let config = Config::from_toml(
            r#"
            [file_events]
            activation = "immediate"

            [logging]
            level = "trace"
            format = "json"
            timestamps = false
            "#,
        )
        .unwrap();
        assert_eq!(config.file_events.activation, ActivationMode::Immediate);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.timestamps);
    }

    #[test]
    fn test_activation_aliases() {
        let config = Config::from_toml("[file_events]\nactivation = \"deferred\"").unwrap();
        assert_eq!(config.file_events.activation, ActivationMode::NextIteration);

        assert_eq!("sync".parse(), Ok(ActivationMode::Immediate));
        assert_eq!("Next-Iteration".parse(), Ok(ActivationMode::NextIteration));
        assert!("eventually".parse::<ActivationMode>().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = Config::from_toml("[file_events]\ntrigger = \"edge\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("trigger"));
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"compact\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("missing.toml")).unwrap_err();
        match err {
            ConfigError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }
}
