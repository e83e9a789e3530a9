//! Artifact classification
//!
//! Files under the artifact root are classified purely by name pattern, never
//! by content. Each logical category lives in its own subdirectory: GC logs
//! under `gclog/`, thread snapshots under `dumps/`.

use std::path::PathBuf;

/// Subdirectory holding the active and rotated GC logs
pub const GC_LOG_SUBDIR: &str = "gclog";

/// Subdirectory holding thread snapshot files
pub const DUMP_SUBDIR: &str = "dumps";

/// Canonical name of the active GC log
pub const GC_LOG_NAME: &str = "gc.log";

/// Extension marking a file as a textual thread snapshot
pub const THREAD_DUMP_SUFFIX: &str = ".td.txt";

/// Logical kind of an artifact file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The single continuously-overwritten current GC log
    GcLogActive,

    /// An immutable rotated GC log, numbered by the log producer
    GcLogRotated { index: u32 },

    /// An immutable thread snapshot file
    ThreadDump,

    /// Anything else; never uploaded
    Other,
}

impl ArtifactKind {
    /// Upload-once artifacts are deleted locally after a confirmed upload
    pub fn is_upload_once(&self) -> bool {
        matches!(self, ArtifactKind::GcLogRotated { .. } | ArtifactKind::ThreadDump)
    }
}

/// A filesystem entry discovered under the artifact root
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size: u64,
}

impl ArtifactFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Classify a file name found in the GC log directory
///
/// `gc.log` is active; `gc.log.<digits>` is rotated with that index; anything
/// else (backups, tmp files, non-numeric suffixes) is left alone.
pub fn classify_gc_log(name: &str) -> ArtifactKind {
    if name == GC_LOG_NAME {
        return ArtifactKind::GcLogActive;
    }
    if let Some(suffix) = name.strip_prefix(GC_LOG_NAME).and_then(|s| s.strip_prefix('.')) {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = suffix.parse::<u32>() {
                return ArtifactKind::GcLogRotated { index };
            }
        }
    }
    ArtifactKind::Other
}

/// Classify a file name found in the snapshot directory
pub fn classify_dump(name: &str) -> ArtifactKind {
    if name.ends_with(THREAD_DUMP_SUFFIX) {
        ArtifactKind::ThreadDump
    } else {
        ArtifactKind::Other
    }
}
