//! TunnelPass Logging
//!
//! Installs the process-wide `tracing` subscriber. `RUST_LOG` wins when set;
//! otherwise the filter is `<level>,tunnelpass=<level>`.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Verbosity for TunnelPass crates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter directive used when `RUST_LOG` is unset
    pub fn directive(&self) -> String {
        format!("{0},tunnelpass={0}", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(LoggingError::UnknownLevel(other.to_string())),
        }
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the subscriber, failing if one is already installed
pub fn try_init(level: LogLevel) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter_for(level))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Install the subscriber; a second call is a no-op
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" WARNING ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_directive() {
        assert_eq!(LogLevel::Debug.directive(), "debug,tunnelpass=debug");
    }

    #[test]
    fn test_second_init_reports_error() {
        init(LogLevel::Info);
        assert!(matches!(
            try_init(LogLevel::Debug),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
