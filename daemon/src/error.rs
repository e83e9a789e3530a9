//! Error handling for the diagship daemon
//!
//! Each component reports failures through its own error type; the top-level
//! `DaemonError` aggregates them for the CLI layer. Only configuration errors
//! are allowed to terminate the process, and only before scheduling begins.

use std::io;

use thiserror::Error;

/// The main error type for the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration related errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Upload related errors
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Snapshot capture errors
    #[error("dump error: {0}")]
    Dump(#[from] DumpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("remote configuration fetch failed: {reason}")]
    RemoteFetch { reason: String },
}

/// Upload related errors
///
/// Everything here is retryable by leaving the file on disk for the next scan
/// tick, except `SourceMissing`, which means the cleanup goal is already met.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("local file vanished: {path}")]
    SourceMissing { path: String },

    #[error("failed to read {path}: {source}")]
    SourceRead { path: String, source: io::Error },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("collector rejected {url}: status {status}")]
    Rejected { url: String, status: u16 },
}

/// Snapshot capture errors
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("monitored process not found: {name}")]
    ProcessNotFound { name: String },

    #[error("failed to inspect process {pid}: {reason}")]
    InspectFailed { pid: u32, reason: String },

    #[error("failed to write snapshot: {0}")]
    Write(#[from] io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DaemonError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for upload operations
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// A specialized result type for snapshot capture
pub type DumpResult<T> = std::result::Result<T, DumpError>;

impl UploadError {
    /// True when the failure means the local file is already gone, so the
    /// artifact needs no retry and no cleanup.
    pub fn is_source_missing(&self) -> bool {
        matches!(self, UploadError::SourceMissing { .. })
    }
}

impl From<String> for DaemonError {
    fn from(msg: String) -> Self {
        DaemonError::Generic(msg)
    }
}

impl From<&str> for DaemonError {
    fn from(msg: &str) -> Self {
        DaemonError::Generic(msg.to_string())
    }
}
