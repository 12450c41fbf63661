//! Error types for assetcache-core.
//!
//! Each failure class of the cache manager has its own enum so callers can
//! tell a fatal install failure apart from a swallowed best-effort one.

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Failures raised by the network seam.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request to {url} failed: {reason}")]
    Failed { url: String, reason: String },

    #[error("Request to {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Failures raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry metadata at {path}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid generation name: {0:?}")]
    InvalidName(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures that abort an install attempt.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Required asset {url} could not be cached")]
    RequiredAsset {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Storage failure during install")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file: {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),
}
