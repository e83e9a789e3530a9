//! On-demand thread snapshots of the monitored process
//!
//! Capture is abstracted behind the `ProcessInspector` trait so the rest of
//! the daemon is agnostic to how the target process is introspected. The
//! production implementation walks `/proc/<pid>/task`; tests use a scripted
//! inspector. Snapshot files are written atomically into the artifact root
//! so the scan pipeline picks them up like any other artifact.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sysinfo::System;
use tracing::{debug, info};

use crate::artifact::THREAD_DUMP_SUFFIX;
use crate::config::DaemonConfig;
use crate::error::{DumpError, DumpResult};

/// One observed execution thread of the monitored process
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub name: String,
    pub tid: u32,
    pub state: String,
    /// Call stack ordered outermost caller first
    pub frames: Vec<String>,
}

/// Capability interface for out-of-process thread introspection
pub trait ProcessInspector {
    /// Resolve the pid of the monitored process
    fn resolve_pid(&self) -> DumpResult<u32>;

    /// Enumerate the threads of `pid` with their current call stacks
    fn threads(&self, pid: u32) -> DumpResult<Vec<ThreadRecord>>;
}

/// Linux procfs-backed inspector
///
/// Thread names come from `task/<tid>/comm`, states from `task/<tid>/stat`,
/// and call stacks from `task/<tid>/stack` (kernel-side frames; readable
/// when the daemon is privileged enough, otherwise the snapshot still lists
/// every thread with its name and state).
pub struct ProcfsInspector {
    process_name: String,
    pid_override: Option<u32>,
}

impl ProcfsInspector {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            process_name: config.target.process_name.clone(),
            pid_override: config.target.pid,
        }
    }
}

impl ProcessInspector for ProcfsInspector {
    fn resolve_pid(&self) -> DumpResult<u32> {
        if let Some(pid) = self.pid_override {
            return Ok(pid);
        }
        if self.process_name.is_empty() {
            return Err(DumpError::ProcessNotFound { name: "<process name not configured>".into() });
        }

        let mut system = System::new();
        system.refresh_processes();
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == self.process_name)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();

        pids.first()
            .copied()
            .ok_or_else(|| DumpError::ProcessNotFound { name: self.process_name.clone() })
    }

    fn threads(&self, pid: u32) -> DumpResult<Vec<ThreadRecord>> {
        let task_dir = PathBuf::from(format!("/proc/{pid}/task"));
        let entries = fs::read_dir(&task_dir)
            .map_err(|err| DumpError::InspectFailed { pid, reason: err.to_string() })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                // Threads can exit while we walk the directory
                Err(_) => continue,
            };
            let Ok(tid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            let base = entry.path();

            let name = match fs::read_to_string(base.join("comm")) {
                Ok(comm) => comm.trim().to_string(),
                Err(_) => continue,
            };
            let state = fs::read_to_string(base.join("stat"))
                .ok()
                .and_then(|stat| parse_stat_state(&stat))
                .map(state_word)
                .unwrap_or("unknown")
                .to_string();
            // Stack reads need elevated privileges; degrade to an empty
            // frame list rather than failing the whole capture
            let frames = fs::read_to_string(base.join("stack"))
                .map(|stack| parse_stack_frames(&stack))
                .unwrap_or_default();

            records.push(ThreadRecord { name, tid, state, frames });
        }

        if records.is_empty() {
            return Err(DumpError::InspectFailed { pid, reason: "no threads visible".to_string() });
        }
        records.sort_by_key(|record| record.tid);
        Ok(records)
    }
}

/// Extract the single-character state field that follows the parenthesized
/// command name in `/proc/<pid>/stat`
fn parse_stat_state(stat: &str) -> Option<char> {
    let rest = stat.rsplit_once(')')?.1;
    rest.split_whitespace().next()?.chars().next()
}

fn state_word(state: char) -> &'static str {
    match state {
        'R' => "runnable",
        'S' => "sleeping",
        'D' => "waiting",
        'T' | 't' => "stopped",
        'Z' => "zombie",
        'I' => "idle",
        _ => "unknown",
    }
}

/// Parse `/proc/<pid>/task/<tid>/stack` lines of the form
/// `[<0>] symbol+0x1a/0x40` into bare symbol names, reordered so the
/// outermost caller comes first
fn parse_stack_frames(stack: &str) -> Vec<String> {
    let mut frames: Vec<String> = stack
        .lines()
        .filter_map(|line| {
            let (_, frame) = line.split_once("] ")?;
            let symbol = frame.split('+').next().unwrap_or(frame).trim();
            if symbol.is_empty() || symbol.starts_with("0x") {
                None
            } else {
                Some(symbol.to_string())
            }
        })
        .collect();
    frames.reverse();
    frames
}

/// Render the deterministic snapshot text: one record per thread with name,
/// state and the call stack from outermost to innermost frame
pub fn render_snapshot(pid: u32, taken_at: DateTime<Utc>, threads: &[ThreadRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Thread snapshot of pid {pid} at {}", taken_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"));
    let _ = writeln!(out, "{} threads", threads.len());
    for thread in threads {
        let _ = writeln!(out);
        let _ = writeln!(out, "\"{}\" tid={} state={}", thread.name, thread.tid, thread.state);
        for frame in &thread.frames {
            let _ = writeln!(out, "    at {frame}");
        }
    }
    out
}

/// Produces snapshot files in the artifact root
pub struct DumpGenerator<I> {
    inspector: I,
    dump_dir: PathBuf,
    instance: String,
}

impl<I: ProcessInspector> DumpGenerator<I> {
    pub fn new(config: &DaemonConfig, inspector: I) -> Self {
        Self {
            inspector,
            dump_dir: config.dump_dir(),
            instance: config.identity.instance.clone(),
        }
    }

    /// Capture one snapshot now
    pub fn capture(&self) -> DumpResult<PathBuf> {
        self.capture_at(Utc::now())
    }

    /// Capture one snapshot stamped with `taken_at`
    ///
    /// The file is written to a temporary name and renamed into place, so the
    /// scan pipeline never observes a half-written snapshot.
    pub fn capture_at(&self, taken_at: DateTime<Utc>) -> DumpResult<PathBuf> {
        let pid = self.inspector.resolve_pid()?;
        debug!(pid, "capturing thread snapshot");

        let threads = self.inspector.threads(pid)?;
        let body = render_snapshot(pid, taken_at, &threads);

        fs::create_dir_all(&self.dump_dir).map_err(DumpError::Write)?;
        let file_name = format!(
            "{}-{}{}",
            self.instance,
            taken_at.format("%Y%m%dT%H%M%S%.3f"),
            THREAD_DUMP_SUFFIX
        );
        let final_path = self.dump_dir.join(&file_name);
        let tmp_path = self.dump_dir.join(format!("{file_name}.tmp"));

        fs::write(&tmp_path, &body).map_err(DumpError::Write)?;
        fs::rename(&tmp_path, &final_path).map_err(DumpError::Write)?;

        info!(path = %final_path.display(), threads = threads.len(), bytes = body.len(),
            "thread snapshot written");
        Ok(final_path)
    }
}
