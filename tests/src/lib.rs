//! Shared fixtures for the diagship end-to-end tests
//!
//! The centerpiece is [`CollectorServer`], an in-process HTTP double that
//! stands in for both the remote collector (capturing PUT bodies) and the
//! Consul-style KV source (counting fetches and serving a canned response).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use diagship_daemon::config::DaemonConfig;

/// One PUT received by the collector double
#[derive(Debug, Clone)]
pub struct CapturedUpload {
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    uploads: Mutex<Vec<CapturedUpload>>,
    reject_uploads: AtomicBool,
    kv_hits: AtomicUsize,
    kv_body: Mutex<String>,
}

/// In-process stand-in for the collector endpoint and the KV config source
pub struct CollectorServer {
    state: Arc<ServerState>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl CollectorServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        *state.kv_body.lock().unwrap() = "[]".to_string();

        let app = Router::new()
            .route("/v1/kv/*key", get(kv_handler))
            .route("/*path", put(put_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind collector double");
        let addr = listener.local_addr().expect("collector double address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("collector double serve");
        });

        Self { state, addr, handle }
    }

    /// Base URL of the double, usable as both collector and KV source
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn uploads(&self) -> Vec<CapturedUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn upload_paths(&self) -> Vec<String> {
        self.uploads().into_iter().map(|u| u.path).collect()
    }

    pub fn clear_uploads(&self) {
        self.state.uploads.lock().unwrap().clear();
    }

    /// While set, every PUT is answered with 503
    pub fn set_reject_uploads(&self, reject: bool) {
        self.state.reject_uploads.store(reject, Ordering::SeqCst);
    }

    pub fn kv_hits(&self) -> usize {
        self.state.kv_hits.load(Ordering::SeqCst)
    }

    pub fn set_kv_body(&self, body: &str) {
        *self.state.kv_body.lock().unwrap() = body.to_string();
    }
}

impl Drop for CollectorServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn put_handler(
    State(state): State<Arc<ServerState>>,
    UrlPath(path): UrlPath<String>,
    body: Bytes,
) -> StatusCode {
    if state.reject_uploads.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    state
        .uploads
        .lock()
        .unwrap()
        .push(CapturedUpload { path: format!("/{path}"), body: body.to_vec() });
    StatusCode::OK
}

async fn kv_handler(
    State(state): State<Arc<ServerState>>,
    UrlPath(_key): UrlPath<String>,
) -> (StatusCode, String) {
    state.kv_hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, state.kv_body.lock().unwrap().clone())
}

/// A configuration pointed at the collector double with fixed identity
/// labels and fast timers
pub fn test_config(artifact_root: &Path, collector_url: &str) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.artifact_root = artifact_root.to_path_buf();
    config.collector.base_url = collector_url.to_string();
    config.collector.timeout_secs = 5;
    config.identity.namespace = "testing".to_string();
    config.identity.service_name = "orders".to_string();
    config.identity.instance = "pod-0".to_string();
    config.schedule.scan_interval_secs = 1;
    config.schedule.dump_interval_secs = 2;
    config
}
