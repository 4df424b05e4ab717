use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::LoggingConfig;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Console output format
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to the console)
    pub log_dir: Option<PathBuf>,

    /// Enable console logging on stderr
    pub enable_console: bool,

    /// Log rotation policy
    pub rotation: RotationPolicy,

    /// Log retention in days
    pub retention_days: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl RotationPolicy {
    /// Number of rolled files covering `retention_days`.
    pub fn max_log_files(self, retention_days: u32) -> usize {
        let days = usize::try_from(retention_days.max(1)).unwrap_or(usize::MAX);
        match self {
            Self::Daily => days,
            Self::Hourly => days.saturating_mul(24),
            Self::Never => 1,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from(&LoggingConfig::default())
    }
}

impl From<&LoggingConfig> for LogConfig {
    /// Unknown format or rotation names fall back to the defaults; the config
    /// loader rejects them before this point.
    fn from(config: &LoggingConfig) -> Self {
        let format = match config.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let rotation = match config.rotation.as_str() {
            "hourly" => RotationPolicy::Hourly,
            "never" => RotationPolicy::Never,
            _ => RotationPolicy::Daily,
        };

        Self {
            level: config.level.clone(),
            format,
            log_dir: config.log_dir.as_ref().map(PathBuf::from),
            enable_console: config.enable_console,
            rotation,
            retention_days: config.retention_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_logging_config() {
        let config = LoggingConfig {
            format: "json".to_string(),
            rotation: "hourly".to_string(),
            log_dir: Some("/tmp/logs".to_string()),
            ..LoggingConfig::default()
        };

        let log_config = LogConfig::from(&config);
        assert_eq!(log_config.format, LogFormat::Json);
        assert_eq!(log_config.rotation, RotationPolicy::Hourly);
        assert_eq!(log_config.log_dir, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn test_max_log_files() {
        assert_eq!(RotationPolicy::Daily.max_log_files(30), 30);
        assert_eq!(RotationPolicy::Hourly.max_log_files(2), 48);
        assert_eq!(RotationPolicy::Never.max_log_files(30), 1);
        assert_eq!(RotationPolicy::Daily.max_log_files(0), 1);
    }
}
