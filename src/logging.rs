/// Structured logging for the threat status service
///
/// Events go through `tracing`; `init_logger` installs a console layer and,
/// for daemon runs, an append-only file layer. Every event carries the data
/// source it concerns and, where relevant, the record or station id.
/// Fetch and store failures are classified so an offline station logs
/// quieter than a broken credential.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::fmt as subscriber_fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::model::{FetchError, StoreError};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    OpenMeteo,
    Sensors,
    Store,
    Client,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::OpenMeteo => write!(f, "OPEN-METEO"),
            DataSource::Sensors => write!(f, "SENSORS"),
            DataSource::Store => write!(f, "STORE"),
            DataSource::Client => write!(f, "CLIENT"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - concurrent writer, station offline between reports
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a readings/status fetch failure.
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        // Sensors that have not reported yet, or an empty forecast window
        FetchError::NoDataAvailable(_) => FailureType::Unknown,
        FetchError::HttpError(code) if *code == 429 || *code >= 500 => FailureType::Unknown,
        FetchError::HttpError(_) => FailureType::Unexpected,
        // Parse errors suggest API changes or bugs
        FetchError::ParseError(_) => FailureType::Unexpected,
        FetchError::Transport(msg) if msg.contains("timed out") => FailureType::Unknown,
        FetchError::Transport(_) => FailureType::Unexpected,
    }
}

/// Classify a versioned store failure.
pub fn classify_store_failure(err: &StoreError) -> FailureType {
    match err {
        StoreError::VersionConflict { .. } => FailureType::Expected,
        StoreError::HttpStatus { status, .. } if *status == 401 || *status == 403 => {
            FailureType::Unexpected
        }
        StoreError::HttpStatus { .. } => FailureType::Unknown,
        StoreError::Transport(_) => FailureType::Unknown,
        StoreError::Malformed { .. } | StoreError::InvalidPath(_) => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Initialize the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `min_level`. Calling this
/// more than once keeps the first subscriber.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let console = subscriber_fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let console = if console_timestamps {
        console.boxed()
    } else {
        console.without_time().boxed()
    };

    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                subscriber_fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
                None
            }
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a readings or status fetch failure with automatic classification
pub fn log_fetch_failure(source: DataSource, id: Option<&str>, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let id = id.unwrap_or("-");
    match failure_type {
        FailureType::Expected => {
            tracing::debug!(source = %source, id, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unexpected => {
            tracing::error!(source = %source, id, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unknown => {
            tracing::warn!(source = %source, id, failure = %failure_type, "{} failed: {}", operation, err)
        }
    }
}

/// Log a store failure with classification
pub fn log_store_failure(path: &str, operation: &str, err: &StoreError) {
    let failure_type = classify_store_failure(err);
    let source = DataSource::Store;
    match failure_type {
        FailureType::Expected => {
            tracing::info!(source = %source, path, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unexpected => {
            tracing::error!(source = %source, path, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unknown => {
            tracing::warn!(source = %source, path, failure = %failure_type, "{} failed: {}", operation, err)
        }
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a multi-source fetch or multi-cycle run
pub fn log_batch_summary(source: DataSource, label: &str, total: usize, successful: usize, failed: usize) {
    if failed == 0 {
        tracing::info!(source = %source, "{} complete: {}/{} successful", label, successful, total);
    } else if successful == 0 {
        tracing::error!(source = %source, "{} complete: 0/{} successful, {} failed", label, total, failed);
    } else {
        tracing::warn!(source = %source, "{} complete: {}/{} successful, {} failed", label, successful, total, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("trace".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_fetch_failure_classification() {
        let empty = FetchError::NoDataAvailable("no hourly precipitation".to_string());
        assert_eq!(classify_fetch_failure(&empty), FailureType::Unknown);

        assert_eq!(classify_fetch_failure(&FetchError::HttpError(503)), FailureType::Unknown);
        assert_eq!(classify_fetch_failure(&FetchError::HttpError(404)), FailureType::Unexpected);
        assert_eq!(
            classify_fetch_failure(&FetchError::ParseError("missing field".into())),
            FailureType::Unexpected
        );
    }

    #[test]
    fn test_store_failure_classification() {
        let conflict = StoreError::VersionConflict { path: "threats/latest".into() };
        assert_eq!(classify_store_failure(&conflict), FailureType::Expected);

        let denied = StoreError::HttpStatus { status: 401, path: "threats/latest".into() };
        assert_eq!(classify_store_failure(&denied), FailureType::Unexpected);
    }
}
