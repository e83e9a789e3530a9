//! Remote key-value configuration overrides
//!
//! When enabled (and the operating mode allows remote interaction at all),
//! the resolver makes exactly one timeout-bounded GET against a Consul-style
//! KV endpoint at startup. An unreachable or malformed source is never
//! fatal: diagnostics collection must not be blocked by the control plane,
//! so the daemon logs a warning and proceeds with its local settings.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Fetch overrides and fold them into `config`
///
/// Every failure path degrades to a warning; individual malformed values are
/// skipped rather than rejecting the whole fetch.
pub async fn apply_overrides(config: &mut DaemonConfig) {
    if !config.remote_enabled() {
        debug!("mode off, skipping remote configuration fetch");
        return;
    }
    if !config.remote_config.enabled || config.remote_config.url.is_empty() {
        debug!("remote configuration fetch disabled, using local settings");
        return;
    }

    match fetch_overrides(config).await {
        Ok(overrides) => {
            let mut applied = 0;
            for (key, value) in &overrides {
                match config.apply_setting(key, value) {
                    Ok(()) => applied += 1,
                    Err(err) => warn!("ignoring remote override {key}={value}: {err}"),
                }
            }
            info!(applied, total = overrides.len(), "remote configuration overrides applied");
        }
        Err(err) => {
            warn!("remote configuration fetch failed, continuing with local settings: {err}");
        }
    }
}

/// Single GET against `<url>/v1/kv/diagship/<namespace>/<service>?recurse=true`
pub async fn fetch_overrides(config: &DaemonConfig) -> ConfigResult<HashMap<String, String>> {
    let url = format!(
        "{}/v1/kv/diagship/{}/{}?recurse=true",
        config.remote_config.url.trim_end_matches('/'),
        config.identity.namespace,
        config.identity.service_name,
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.remote_config.timeout_secs))
        .build()
        .map_err(|e| ConfigError::RemoteFetch { reason: e.to_string() })?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ConfigError::RemoteFetch { reason: e.to_string() })?;

    if !response.status().is_success() {
        return Err(ConfigError::RemoteFetch {
            reason: format!("{url} returned status {}", response.status()),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ConfigError::RemoteFetch { reason: e.to_string() })?;

    parse_entries(&body)
}

/// Decode the KV response body into canonical setting keys
///
/// Keys keep only the segment after the last `/`; values are base64-encoded
/// by the KV store.
pub fn parse_entries(body: &str) -> ConfigResult<HashMap<String, String>> {
    let entries: Vec<KvEntry> = serde_json::from_str(body)
        .map_err(|e| ConfigError::RemoteFetch { reason: format!("malformed KV response: {e}") })?;

    let mut overrides = HashMap::new();
    for entry in entries {
        let Some(encoded) = entry.value else { continue };
        let name = entry.key.rsplit('/').next().unwrap_or(&entry.key).to_string();
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| ConfigError::RemoteFetch { reason: format!("bad value for {name}: {e}") })?;
        let value = String::from_utf8(decoded)
            .map_err(|e| ConfigError::RemoteFetch { reason: format!("bad value for {name}: {e}") })?;
        overrides.insert(name, value);
    }
    Ok(overrides)
}
