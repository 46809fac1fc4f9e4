//! Error types for the node warmer

use std::path::Path;
use thiserror::Error;

/// Result type alias for warmer operations
pub type Result<T> = std::result::Result<T, WarmerError>;

/// Error types that can occur while warming a node
#[derive(Error, Debug, Clone)]
pub enum WarmerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Fingerprint error: {0}")]
    FingerprintError(String),

    #[error("Version store error: {0}")]
    VersionStoreError(String),

    #[error("Target discovery error: {0}")]
    TargetDiscoveryError(String),

    #[error("Cache flush error: {0}")]
    CacheFlushError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Sentinel error: {0}")]
    SentinelError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for WarmerError {
    fn from(err: std::io::Error) -> Self {
        WarmerError::IoError(err.to_string())
    }
}

impl From<prometheus::Error> for WarmerError {
    fn from(err: prometheus::Error) -> Self {
        WarmerError::MetricsError(err.to_string())
    }
}

impl WarmerError {
    /// Whether this error is a transport-level failure of a single request.
    ///
    /// Transient errors are absorbed by the dispatcher (requeue + throttle);
    /// everything else either aborts the run or is handled by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            WarmerError::HttpError(_) => true,
            WarmerError::Timeout(_) => true,
            WarmerError::IoError(_) => true,

            WarmerError::ConfigError(_) => false,
            WarmerError::FingerprintError(_) => false,
            WarmerError::VersionStoreError(_) => false,
            WarmerError::TargetDiscoveryError(_) => false,
            WarmerError::CacheFlushError(_) => false,
            WarmerError::InvalidUrl(_) => false,
            WarmerError::SentinelError(_) => false,
            WarmerError::MetricsError(_) => false,
            WarmerError::InternalError(_) => false,
        }
    }

    /// Build an IoError that names the file involved
    pub fn io_at(path: &Path, err: std::io::Error) -> Self {
        WarmerError::IoError(format!("{}: {}", path.display(), err))
    }

    /// Map a reqwest failure onto the transport taxonomy
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WarmerError::Timeout(err.to_string())
        } else {
            WarmerError::HttpError(err.to_string())
        }
    }
}
