//! Whole-file uploads to the remote collector
//!
//! Every transfer is a full-file-replace HTTP PUT: the file's current bytes
//! are read completely before the request is issued, so the remote copy at
//! any observation point is a byte-for-byte prefix of what the local file
//! eventually becomes, never a mix of old and new content. There is no
//! append mode and no internal retry; callers leave failed files on disk for
//! the next scan tick.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::artifact::{ArtifactFile, ArtifactKind, GC_LOG_NAME};
use crate::config::DaemonConfig;
use crate::error::{UploadError, UploadResult};

/// Timestamp token embedded in upload-once remote paths. Millisecond
/// precision keeps paths distinct across rotation bursts and daemon restarts.
const TOKEN_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// A fully-resolved destination URL at the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives collision-free remote paths from the identity labels
#[derive(Debug, Clone)]
pub struct RemotePathBuilder {
    base: String,
    namespace: String,
    instance: String,
}

impl RemotePathBuilder {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            base: config.collector.base_url.trim_end_matches('/').to_string(),
            namespace: config.identity.namespace.clone(),
            instance: config.identity.instance.clone(),
        }
    }

    /// Resolve the destination for one artifact
    ///
    /// The active GC log maps to a stable path so each tick's PUT overwrites
    /// the previous snapshot. Rotated logs get a fresh timestamp token plus
    /// the rotation index, so two rotation instances never share a path even
    /// when indices restart across process restarts. Snapshot files are
    /// already unique by name.
    pub fn for_artifact(&self, artifact: &ArtifactFile, now: DateTime<Utc>) -> RemotePath {
        let prefix = format!("{}/{}/{}", self.base, self.namespace, self.instance);
        let url = match artifact.kind {
            ArtifactKind::GcLogActive => {
                format!("{prefix}/gclog/current/{GC_LOG_NAME}")
            }
            ArtifactKind::GcLogRotated { index } => {
                format!("{prefix}/gclog/{}/{GC_LOG_NAME}.{index}", now.format(TOKEN_FORMAT))
            }
            ArtifactKind::ThreadDump | ArtifactKind::Other => {
                format!("{prefix}/dumps/{}", artifact.file_name())
            }
        };
        RemotePath(url)
    }
}

/// Transfer of one file's full current content to a remote path
pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        local: &Path,
        remote: &RemotePath,
    ) -> impl Future<Output = UploadResult<()>> + Send;
}

/// Production uploader backed by a shared HTTP client
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> UploadResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, local: &Path, remote: &RemotePath) -> UploadResult<()> {
        let body = tokio::fs::read(local).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                UploadError::SourceMissing { path: local.display().to_string() }
            } else {
                UploadError::SourceRead { path: local.display().to_string(), source }
            }
        })?;

        debug!(bytes = body.len(), url = %remote, "uploading artifact");

        let response = self
            .client
            .put(remote.as_str())
            .body(body)
            .send()
            .await
            .map_err(|source| UploadError::Request { url: remote.to_string(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected { url: remote.to_string(), status: status.as_u16() });
        }
        Ok(())
    }
}
