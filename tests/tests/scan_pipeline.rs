//! End-to-end scan pipeline scenarios against the in-process collector

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use diagship_daemon::config::Mode;
use diagship_daemon::dump::{DumpGenerator, ProcessInspector, ThreadRecord};
use diagship_daemon::error::DumpResult;
use diagship_daemon::service::ScanPipeline;
use diagship_daemon::uploader::HttpUploader;
use tempfile::TempDir;

use diagship_tests::{test_config, CollectorServer};

fn write(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn pipeline(root: &Path, collector_url: &str) -> ScanPipeline<HttpUploader> {
    let config = Arc::new(test_config(root, collector_url));
    let uploader = HttpUploader::new(config.collector_timeout()).unwrap();
    ScanPipeline::new(config, uploader)
}

#[tokio::test]
async fn single_active_file_is_put_once_and_left_in_place() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    let content = vec![b'g'; 500];
    let local = write(dir.path(), "gclog/gc.log", &content);

    let mut scan = pipeline(dir.path(), &server.url());
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 1);
    let uploads = server.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].path, "/testing/pod-0/gclog/current/gc.log");
    assert_eq!(uploads[0].body, content);
    assert!(local.exists(), "the active file is never deleted");
}

#[tokio::test]
async fn active_then_rotated_are_put_in_order_and_rotated_is_deleted() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    let active = write(dir.path(), "gclog/gc.log", b"active-data");
    let rotated = write(dir.path(), "gclog/gc.log.0", b"rotated-data");

    let mut scan = pipeline(dir.path(), &server.url());
    scan.run_tick().await;

    let paths = server.upload_paths();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], "/testing/pod-0/gclog/current/gc.log");
    assert!(paths[1].ends_with("/gc.log.0"));

    assert!(!rotated.exists(), "rotated file deleted after its PUT succeeded");
    assert!(active.exists());
}

#[tokio::test]
async fn rotation_backlog_lands_on_distinct_paths_and_is_cleared() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    for index in 0..3 {
        write(dir.path(), &format!("gclog/gc.log.{index}"), format!("rotation {index}").as_bytes());
    }

    let mut scan = pipeline(dir.path(), &server.url());
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 3);
    let mut paths = server.upload_paths();
    assert_eq!(paths.len(), 3);
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3, "every rotation instance gets its own remote path");

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("gclog"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(leftovers.is_empty(), "no rotated files remain on disk");
}

#[tokio::test]
async fn collector_outage_delays_but_never_loses_files() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    let rotated = write(dir.path(), "gclog/gc.log.0", b"survives the outage");

    server.set_reject_uploads(true);
    let mut scan = pipeline(dir.path(), &server.url());
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 0);
    assert_eq!(outcome.failed, 1);
    assert!(rotated.exists(), "file stays on disk through the outage");
    server.clear_uploads();

    server.set_reject_uploads(false);
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 1);
    assert_eq!(server.uploads().len(), 1);
    assert!(!rotated.exists(), "recovered tick ships and cleans up");
}

#[tokio::test]
async fn second_tick_without_changes_reuploads_only_the_active_file() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    write(dir.path(), "gclog/gc.log", b"active");
    write(dir.path(), "gclog/gc.log.0", b"rotated");

    let mut scan = pipeline(dir.path(), &server.url());
    scan.run_tick().await;
    assert_eq!(server.uploads().len(), 2);
    server.clear_uploads();

    scan.run_tick().await;
    let paths = server.upload_paths();
    assert_eq!(paths, vec!["/testing/pod-0/gclog/current/gc.log".to_string()],
        "no duplicate upload of the already-shipped rotated file");
}

#[tokio::test]
async fn mode_off_makes_no_network_calls() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    write(dir.path(), "gclog/gc.log", b"active");
    write(dir.path(), "gclog/gc.log.0", b"rotated");

    let mut config = test_config(dir.path(), &server.url());
    config.mode = Mode::Off;
    let uploader = HttpUploader::new(config.collector_timeout()).unwrap();
    let mut scan = ScanPipeline::new(Arc::new(config), uploader);

    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 0);
    assert!(server.uploads().is_empty());
    assert!(dir.path().join("gclog/gc.log.0").exists(), "nothing is deleted either");
}

/// Scripted inspector so the snapshot flow needs no privileged procfs access
struct ScriptedInspector;

impl ProcessInspector for ScriptedInspector {
    fn resolve_pid(&self) -> DumpResult<u32> {
        Ok(4242)
    }

    fn threads(&self, _pid: u32) -> DumpResult<Vec<ThreadRecord>> {
        Ok(vec![ThreadRecord {
            name: "main".to_string(),
            tid: 4242,
            state: "sleeping".to_string(),
            frames: vec!["entry_point".to_string(), "nanosleep".to_string()],
        }])
    }
}

#[tokio::test]
async fn captured_snapshot_is_shipped_by_the_next_scan_and_removed() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();

    let config = test_config(dir.path(), &server.url());
    let generator = DumpGenerator::new(&config, ScriptedInspector);
    let snapshot = generator.capture().unwrap();
    assert!(snapshot.exists());

    let mut scan = pipeline(dir.path(), &server.url());
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 1);
    let uploads = server.uploads();
    assert!(uploads[0].path.starts_with("/testing/pod-0/dumps/pod-0-"));
    assert!(uploads[0].path.ends_with(".td.txt"));
    let body = String::from_utf8(uploads[0].body.clone()).unwrap();
    assert!(body.contains("\"main\""));
    assert!(body.contains("    at nanosleep"));
    assert!(!snapshot.exists(), "shipped snapshot removed from local disk");
}

#[tokio::test]
async fn dump_upload_toggle_keeps_snapshots_local() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = test_config(dir.path(), &server.url());
    config.collector.dump_upload_enabled = false;

    let generator = DumpGenerator::new(&config, ScriptedInspector);
    let snapshot = generator.capture().unwrap();

    let uploader = HttpUploader::new(config.collector_timeout()).unwrap();
    let mut scan = ScanPipeline::new(Arc::new(config), uploader);
    let outcome = scan.run_tick().await;

    assert_eq!(outcome.uploaded, 0);
    assert!(server.uploads().is_empty());
    assert!(snapshot.exists(), "snapshot stays local when dump uploads are disabled");
}
