//! Rotation-aware artifact discovery
//!
//! The tracker enumerates the artifact root fresh on every scan tick: there
//! is no persisted file list, so rediscovery after a daemon restart is
//! idempotent. The only state carried between ticks is the in-memory record
//! of upload-once artifacts that were already shipped, which keeps a file
//! from being re-sent if it is observed again before its deletion completes.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::artifact::{self, ArtifactFile, ArtifactKind};

/// Identity of an upload-once artifact in the upload record
///
/// Rotated GC logs are keyed by rotation index (indices are assigned by the
/// log producer and restart per process instance); snapshots by file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UploadKey {
    RotatedGcLog { index: u32 },
    ThreadDump { name: String },
}

impl UploadKey {
    fn for_artifact(file: &ArtifactFile) -> Option<Self> {
        match file.kind {
            ArtifactKind::GcLogRotated { index } => Some(UploadKey::RotatedGcLog { index }),
            ArtifactKind::ThreadDump => Some(UploadKey::ThreadDump { name: file.file_name() }),
            ArtifactKind::GcLogActive | ArtifactKind::Other => None,
        }
    }

    fn local_path(&self, root: &Path) -> PathBuf {
        match self {
            UploadKey::RotatedGcLog { index } => root
                .join(artifact::GC_LOG_SUBDIR)
                .join(format!("{}.{index}", artifact::GC_LOG_NAME)),
            UploadKey::ThreadDump { name } => root.join(artifact::DUMP_SUBDIR).join(name),
        }
    }
}

/// Classifies on-disk artifacts into active and upload-once sets and owns the
/// per-run upload record
pub struct RotationTracker {
    root: PathBuf,
    uploaded: HashSet<UploadKey>,
}

impl RotationTracker {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            uploaded: HashSet::new(),
        }
    }

    /// Produce the ordered worklist for one scan tick
    ///
    /// Order: the active GC log first, then rotated logs by increasing index
    /// (oldest first, preserving chronological delivery at the collector),
    /// then snapshot files by name. Upload-once artifacts already marked in
    /// the record are skipped; the active file is always included since it
    /// may have grown.
    pub fn discover(&self) -> io::Result<Vec<ArtifactFile>> {
        let mut active = None;
        let mut rotated = Vec::new();
        let mut dumps = Vec::new();

        let gclog_dir = self.root.join(artifact::GC_LOG_SUBDIR);
        if gclog_dir.is_dir() {
            for entry in WalkDir::new(&gclog_dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let kind = artifact::classify_gc_log(&name);
                let file = ArtifactFile {
                    path: entry.path().to_path_buf(),
                    kind,
                    size: entry.metadata()?.len(),
                };
                match kind {
                    // An empty active log has nothing worth shipping yet
                    ArtifactKind::GcLogActive if file.size > 0 => active = Some(file),
                    ArtifactKind::GcLogRotated { index } => {
                        if !self.uploaded.contains(&UploadKey::RotatedGcLog { index }) {
                            rotated.push(file);
                        }
                    }
                    _ => {}
                }
            }
        }

        let dump_dir = self.root.join(artifact::DUMP_SUBDIR);
        if dump_dir.is_dir() {
            for entry in WalkDir::new(&dump_dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if artifact::classify_dump(&name) != ArtifactKind::ThreadDump {
                    continue;
                }
                if self.uploaded.contains(&UploadKey::ThreadDump { name }) {
                    continue;
                }
                dumps.push(ArtifactFile {
                    path: entry.path().to_path_buf(),
                    kind: ArtifactKind::ThreadDump,
                    size: entry.metadata()?.len(),
                });
            }
        }

        rotated.sort_by_key(|file| match file.kind {
            ArtifactKind::GcLogRotated { index } => index,
            _ => u32::MAX,
        });
        dumps.sort_by(|a, b| a.path.cmp(&b.path));

        let mut worklist = Vec::with_capacity(1 + rotated.len() + dumps.len());
        worklist.extend(active);
        worklist.extend(rotated);
        worklist.extend(dumps);
        Ok(worklist)
    }

    /// Record a confirmed upload and delete the local file in the same step
    ///
    /// Must only be called after the upload reported success. Active files
    /// are never recorded or deleted. A file already gone counts as done.
    pub fn complete(&mut self, file: &ArtifactFile) -> io::Result<()> {
        let Some(key) = UploadKey::for_artifact(file) else {
            return Ok(());
        };
        self.uploaded.insert(key);
        match fs::remove_file(&file.path) {
            Ok(()) => {
                debug!(path = %file.path.display(), "uploaded artifact deleted locally");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drop record entries whose files are confirmed gone from disk
    ///
    /// Keys for files still present are kept so a file whose deletion failed
    /// is not re-uploaded within this run.
    pub fn prune_record(&mut self) {
        let root = self.root.clone();
        self.uploaded.retain(|key| key.local_path(&root).exists());
    }

    /// Delete snapshot files older than the retention window
    ///
    /// Runs even when uploads are disabled so `off` mode cannot grow the
    /// local disk without bound. Returns the number of files removed.
    pub fn sweep_stale_dumps(&mut self, retention: Duration, now: SystemTime) -> io::Result<usize> {
        let dump_dir = self.root.join(artifact::DUMP_SUBDIR);
        if !dump_dir.is_dir() {
            return Ok(0);
        }

        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in WalkDir::new(&dump_dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = match entry.metadata()?.modified() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    self.uploaded.remove(&UploadKey::ThreadDump { name });
                    removed += 1;
                    debug!(path = %entry.path().display(), "stale snapshot pruned");
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %entry.path().display(), "failed to prune stale snapshot: {err}"),
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn recorded(&self) -> &HashSet<UploadKey> {
        &self.uploaded
    }
}
