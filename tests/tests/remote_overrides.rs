//! Remote configuration fetch behavior across operating modes

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tempfile::TempDir;

use diagship_daemon::config::Mode;
use diagship_daemon::remote_config;
use diagship_tests::{test_config, CollectorServer};

fn kv_entry(key: &str, value: &str) -> String {
    format!(r#"{{"Key": "diagship/testing/orders/{key}", "Value": "{}"}}"#, BASE64.encode(value))
}

#[tokio::test]
async fn mode_off_results_in_zero_fetch_attempts() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = test_config(dir.path(), &server.url());
    config.mode = Mode::Off;
    config.remote_config.enabled = true;
    config.remote_config.url = server.url();

    remote_config::apply_overrides(&mut config).await;

    assert_eq!(server.kv_hits(), 0, "off mode must not touch the config source");
}

#[tokio::test]
async fn default_mode_attempts_exactly_one_fetch() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = test_config(dir.path(), &server.url());
    config.remote_config.enabled = true;
    config.remote_config.url = server.url();

    remote_config::apply_overrides(&mut config).await;

    assert_eq!(server.kv_hits(), 1);
}

#[tokio::test]
async fn fetched_overrides_are_applied_and_bad_values_skipped() {
    let server = CollectorServer::start().await;
    let dir = TempDir::new().unwrap();
    server.set_kv_body(&format!(
        "[{}, {}, {}]",
        kv_entry("scan_interval_secs", "5"),
        kv_entry("dump_upload_enabled", "false"),
        kv_entry("dump_interval_secs", "not-a-number"),
    ));

    let mut config = test_config(dir.path(), &server.url());
    config.remote_config.enabled = true;
    config.remote_config.url = server.url();
    let dump_interval_before = config.schedule.dump_interval_secs;

    remote_config::apply_overrides(&mut config).await;

    assert_eq!(config.schedule.scan_interval_secs, 5);
    assert!(!config.collector.dump_upload_enabled);
    assert_eq!(config.schedule.dump_interval_secs, dump_interval_before,
        "a malformed override is skipped, not fatal");
}

#[tokio::test]
async fn unreachable_source_leaves_local_settings_untouched() {
    let dir = TempDir::new().unwrap();

    let mut config = test_config(dir.path(), "http://127.0.0.1:1");
    config.remote_config.enabled = true;
    config.remote_config.url = "http://127.0.0.1:1".to_string();
    config.remote_config.timeout_secs = 1;

    remote_config::apply_overrides(&mut config).await;

    assert_eq!(config.schedule.scan_interval_secs, 1, "test_config's value survives");
}
