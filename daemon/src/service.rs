//! The daemon control loop
//!
//! Two independently-timed periodic actions share nothing but the immutable
//! configuration snapshot: the scan action (discover, upload, clean up) and
//! the dump action (capture a thread snapshot for the next scan to ship).
//! Ticks of the same action never overlap; scan and dump interleave freely.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactKind;
use crate::config::DaemonConfig;
use crate::dump::{DumpGenerator, ProcessInspector, ProcfsInspector};
use crate::error::Result;
use crate::rotation::RotationTracker;
use crate::uploader::{HttpUploader, RemotePathBuilder, Uploader};

/// Per-tick summary of the scan action
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOutcome {
    /// Files whose upload succeeded this tick
    pub uploaded: usize,

    /// Files whose upload failed and were left for the next tick
    pub failed: usize,

    /// Files that vanished before upload; the cleanup goal was already met
    pub resolved: usize,

    /// Stale snapshot files pruned by the retention sweep
    pub swept: usize,
}

/// One scan action over the artifact root
///
/// Owns the rotation tracker (and with it the upload record); the scheduler
/// guarantees single-threaded access by never overlapping scan ticks.
pub struct ScanPipeline<U> {
    config: Arc<DaemonConfig>,
    tracker: RotationTracker,
    paths: RemotePathBuilder,
    uploader: U,
}

impl<U: Uploader> ScanPipeline<U> {
    pub fn new(config: Arc<DaemonConfig>, uploader: U) -> Self {
        let tracker = RotationTracker::new(config.artifact_root.clone());
        let paths = RemotePathBuilder::new(&config);
        Self { config, tracker, paths, uploader }
    }

    /// Run one scan tick to completion
    ///
    /// Per-file failures are isolated: the file stays on disk, the rest of
    /// the worklist is still attempted, and the next tick's rediscovery
    /// retries naturally. Nothing here can fail the daemon.
    pub async fn run_tick(&mut self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        if self.config.remote_enabled() {
            let worklist = match self.tracker.discover() {
                Ok(worklist) => worklist,
                Err(err) => {
                    error!("artifact discovery failed: {err}");
                    Vec::new()
                }
            };

            for file in worklist {
                if file.kind == ArtifactKind::ThreadDump && !self.config.collector.dump_upload_enabled {
                    continue;
                }

                let remote = self.paths.for_artifact(&file, Utc::now());
                match self.uploader.upload(&file.path, &remote).await {
                    Ok(()) => {
                        outcome.uploaded += 1;
                        debug!(path = %file.path.display(), url = %remote, "artifact uploaded");
                        if file.kind.is_upload_once() {
                            if let Err(err) = self.tracker.complete(&file) {
                                error!(path = %file.path.display(),
                                    "failed to delete uploaded artifact: {err}");
                            }
                        }
                    }
                    Err(err) if err.is_source_missing() => {
                        outcome.resolved += 1;
                        debug!(path = %file.path.display(),
                            "artifact vanished before upload, already handled");
                    }
                    Err(err) => {
                        outcome.failed += 1;
                        error!(path = %file.path.display(), url = %remote,
                            "upload failed, file left for next tick: {err}");
                    }
                }
            }

            self.tracker.prune_record();
        }

        match self.tracker.sweep_stale_dumps(self.config.dump_retention(), SystemTime::now()) {
            Ok(swept) => outcome.swept = swept,
            Err(err) => warn!("retention sweep failed: {err}"),
        }

        outcome
    }
}

/// Runs the scan and dump timers until a shutdown signal arrives
pub struct DaemonService;

impl DaemonService {
    pub async fn run(config: Arc<DaemonConfig>) -> Result<()> {
        info!(mode = ?config.mode, root = %config.artifact_root.display(),
            scan_secs = config.schedule.scan_interval_secs,
            dump_secs = config.schedule.dump_interval_secs,
            "starting diagship scheduler");

        let uploader = HttpUploader::new(config.collector_timeout())?;
        let pipeline = ScanPipeline::new(config.clone(), uploader);
        let generator = DumpGenerator::new(&config, ProcfsInspector::from_config(&config));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scan = tokio::spawn(scan_loop(pipeline, config.scan_interval(), shutdown_rx.clone()));
        let dump = tokio::spawn(dump_loop(generator, config.dump_interval(), shutdown_rx));

        wait_for_shutdown().await?;

        info!("shutdown signal received, draining in-flight actions");
        let _ = shutdown_tx.send(true);

        let grace = config.shutdown_grace();
        drain("scan", grace, scan).await;
        drain("dump", grace, dump).await;

        info!("scheduler stopped");
        Ok(())
    }
}

async fn scan_loop<U: Uploader>(
    mut pipeline: ScanPipeline<U>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = pipeline.run_tick().await;
                if outcome.uploaded + outcome.failed + outcome.resolved + outcome.swept > 0 {
                    info!(uploaded = outcome.uploaded, failed = outcome.failed,
                        resolved = outcome.resolved, swept = outcome.swept, "scan tick finished");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn dump_loop<I: ProcessInspector>(
    generator: DumpGenerator<I>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // Scan ticks immediately; the first dump waits a full period
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match generator.capture() {
                    Ok(path) => info!(path = %path.display(), "scheduled thread snapshot captured"),
                    Err(err) => warn!("thread snapshot failed, retrying next interval: {err}"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Wait for a loop to stop, abandoning it past the grace period
///
/// Abandonment cannot corrupt local state: files are only deleted after an
/// upload already reported success.
async fn drain(name: &str, grace: Duration, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => debug!("{name} loop stopped cleanly"),
        Ok(Err(err)) => error!("{name} loop terminated abnormally: {err}"),
        Err(_) => {
            warn!("{name} loop did not stop within {grace:?}, abandoning");
            abort.abort();
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
