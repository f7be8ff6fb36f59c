//! Structured logging utilities for the zzuf stream layer.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! Diagnostics are strictly best-effort: nothing here may change the control
//! flow of an intercepted call.
//!
//! # Usage
//!
//! ```ignore
//! use zzuf_config::log_stream_debug;
//!
//! log_stream_debug!("fread", fd = 3, size = 1, nmemb = 50, ret = 50);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const STREAM: &'static str = "STREAM";
    pub const LIFECYCLE: &'static str = "LIFECYCLE";
    pub const CONFIG: &'static str = "CONFIG";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
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
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(crate::ConfigError::InvalidValue {
                key: crate::ENV_LOG_LEVEL,
                value: s.to_string(),
            }),
        }
    }
}

// === STREAM logging macros ===

#[macro_export]
macro_rules! log_stream_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::STREAM, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_stream_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::STREAM, $($key = $value,)* $msg)
    };
}

// === LIFECYCLE logging macros ===

#[macro_export]
macro_rules! log_lifecycle_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::LIFECYCLE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_lifecycle_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::LIFECYCLE, $($key = $value,)* $msg)
    };
}

// === CONFIG logging macros ===

#[macro_export]
macro_rules! log_config_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::CONFIG, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_config_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::CONFIG, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
///
/// Output goes through Rust's own I/O (stderr or `file`), never C stdio, so
/// diagnostics cannot re-enter the intercepted entry points. Returns false if
/// a global subscriber was already installed.
pub fn init_logging(level: LogLevel, file: Option<&Path>) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("ZZUF_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false);

    let log_file = file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match log_file {
        Some(f) => builder
            .with_writer(std::sync::Mutex::new(f))
            .try_init()
            .is_ok(),
        None => builder.with_writer(std::io::stderr).try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::STREAM, "STREAM");
        assert_eq!(Component::LIFECYCLE, "LIFECYCLE");
        assert_eq!(Component::CONFIG, "CONFIG");
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!(" warn ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
