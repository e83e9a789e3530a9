//! Diagship collection daemon library
//!
//! This library implements the diagnostic-collection daemon that runs next to
//! a monitored service process: it discovers GC logs and thread snapshots
//! under the artifact root, ships them to a remote collector over HTTP PUT,
//! and keeps local disk usage bounded while log rotation happens underneath.

pub mod artifact;
pub mod config;
pub mod dump;
pub mod error;
pub mod remote_config;
pub mod rotation;
pub mod service;
pub mod uploader;

// Re-export commonly used types
pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use rotation::RotationTracker;
pub use service::{DaemonService, ScanPipeline};
pub use uploader::{HttpUploader, RemotePath, RemotePathBuilder, Uploader};
