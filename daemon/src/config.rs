//! Configuration resolution for the diagship daemon
//!
//! Configuration is resolved once at startup and never mutated afterwards.
//! Layering order: built-in defaults, then an optional TOML file, then
//! environment variables, then (for `schedule` mode, when enabled and the
//! operating mode allows it) a single remote key-value override fetch. The
//! resolved snapshot is shared read-only by all scheduler tasks.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact;
use crate::error::{ConfigError, ConfigResult};

/// Environment variable prefix recognized by the resolver
pub const ENV_PREFIX: &str = "DIAGSHIP_";

/// Operating mode of the daemon
///
/// `off` disables all remote interaction; no network calls are made at all,
/// not even the remote config fetch. Any other value, including unset,
/// enables remote interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    #[default]
    Prod,
}

impl Mode {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("off") {
            Mode::Off
        } else {
            Mode::Prod
        }
    }
}

/// Main configuration structure for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Operating mode
    pub mode: Mode,

    /// Base path the daemon reads and writes diagnostic artifacts under
    pub artifact_root: PathBuf,

    /// Remote collector configuration
    pub collector: CollectorConfig,

    /// Remote key-value override source
    pub remote_config: RemoteConfigSource,

    /// Timer cadences and shutdown grace
    pub schedule: ScheduleConfig,

    /// Identity labels used to build collision-free remote paths
    pub identity: IdentityConfig,

    /// Monitored process selection
    pub target: TargetConfig,

    /// Local retention for snapshot files
    pub retention: RetentionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Remote collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Base URL uploads are PUT under
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Whether thread snapshot files are uploaded (they are always captured)
    pub dump_upload_enabled: bool,
}

/// Remote key-value override source (Consul-style KV endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfigSource {
    /// KV source base URL
    pub url: String,

    /// Whether the startup fetch is attempted at all
    pub enabled: bool,

    /// Timeout for the single fetch attempt, in seconds
    pub timeout_secs: u64,
}

/// Timer cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Cadence of the discovery-and-upload action, in seconds
    pub scan_interval_secs: u64,

    /// Cadence of the scheduled thread snapshot action, in seconds
    pub dump_interval_secs: u64,

    /// Grace period granted to in-flight actions on shutdown, in seconds
    pub shutdown_grace_secs: u64,
}

/// Identity labels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Deployment namespace
    pub namespace: String,

    /// Logical service name
    pub service_name: String,

    /// Instance name; defaults to the host name when left empty
    pub instance: String,
}

/// Monitored process selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Process name to look up when no explicit pid is given
    pub process_name: String,

    /// Explicit pid override
    pub pid: Option<u32>,
}

/// Local retention for snapshot files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Snapshot files older than this many days are pruned locally
    pub dump_retention_days: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Route daemon diagnostics to standard output
    pub console: bool,

    /// Optional rolling log file (daily rotation)
    pub file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            artifact_root: default_artifact_root(),
            collector: CollectorConfig::default(),
            remote_config: RemoteConfigSource::default(),
            schedule: ScheduleConfig::default(),
            identity: IdentityConfig::default(),
            target: TargetConfig::default(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("diagship")
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            dump_upload_enabled: true,
        }
    }
}

impl Default for RemoteConfigSource {
    fn default() -> Self {
        Self {
            url: String::new(),
            enabled: false,
            timeout_secs: 5,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            dump_interval_secs: 3600,
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service_name: String::new(),
            instance: String::new(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            process_name: String::new(),
            pid: None,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { dump_retention_days: 7 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: DaemonConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        Ok(config)
    }

    /// Load configuration with fallback order: file -> environment -> defaults
    ///
    /// Validation is left to the caller: `schedule` refuses to start on an
    /// invalid configuration, while `dump` still attempts a best-effort
    /// capture.
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let vars: HashMap<String, String> = env::vars().collect();
        config.apply_env(&vars)?;
        config.fill_instance();
        Ok(config)
    }

    /// Apply recognized `DIAGSHIP_*` variables on top of the current values
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else { continue };
            self.apply_setting(&name.to_ascii_lowercase(), value)?;
        }
        Ok(())
    }

    /// Apply one setting by its canonical (lowercase) key
    ///
    /// Shared between the environment layer and the remote KV override layer.
    /// Unknown keys are ignored.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        match key {
            "mode" => self.mode = Mode::parse(value),
            "artifact_root" => self.artifact_root = PathBuf::from(value),
            "collector_url" => self.collector.base_url = value.to_string(),
            "collector_timeout_secs" => self.collector.timeout_secs = parse_u64(key, value)?,
            "dump_upload_enabled" => self.collector.dump_upload_enabled = parse_bool(key, value)?,
            "remote_config_url" => self.remote_config.url = value.to_string(),
            "remote_config_enabled" => self.remote_config.enabled = parse_bool(key, value)?,
            "remote_config_timeout_secs" => self.remote_config.timeout_secs = parse_u64(key, value)?,
            "scan_interval_secs" => self.schedule.scan_interval_secs = parse_u64(key, value)?,
            "dump_interval_secs" => self.schedule.dump_interval_secs = parse_u64(key, value)?,
            "shutdown_grace_secs" => self.schedule.shutdown_grace_secs = parse_u64(key, value)?,
            "namespace" => self.identity.namespace = value.to_string(),
            "service_name" => self.identity.service_name = value.to_string(),
            "instance" => self.identity.instance = value.to_string(),
            "process_name" => self.target.process_name = value.to_string(),
            "pid" => self.target.pid = Some(parse_u64(key, value)? as u32),
            "dump_retention_days" => self.retention.dump_retention_days = parse_u64(key, value)? as u32,
            "log_level" => self.logging.level = value.to_string(),
            "log_to_console" => self.logging.console = parse_bool(key, value)?,
            "log_file" => self.logging.file = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    fn fill_instance(&mut self) {
        if self.identity.instance.is_empty() {
            self.identity.instance = sysinfo::System::host_name()
                .or_else(|| env::var("HOSTNAME").ok())
                .unwrap_or_else(|| "unknown".to_string());
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.schedule.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_interval_secs".to_string(),
                value: "0".to_string(),
            });
        }

        if self.schedule.dump_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dump_interval_secs".to_string(),
                value: "0".to_string(),
            });
        }

        if self.retention.dump_retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dump_retention_days".to_string(),
                value: "0".to_string(),
            });
        }

        if self.remote_enabled() {
            if self.collector.base_url.is_empty() {
                return Err(ConfigError::MissingField { field: "collector_url".to_string() });
            }
            if self.remote_config.enabled && self.remote_config.url.is_empty() {
                return Err(ConfigError::MissingField { field: "remote_config_url".to_string() });
            }
        }

        Ok(())
    }

    /// Whether any remote interaction is allowed at all
    pub fn remote_enabled(&self) -> bool {
        self.mode != Mode::Off
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.scan_interval_secs)
    }

    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.dump_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.schedule.shutdown_grace_secs)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector.timeout_secs)
    }

    pub fn dump_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention.dump_retention_days) * 24 * 60 * 60)
    }

    /// Directory GC logs are rotated under
    pub fn gclog_dir(&self) -> PathBuf {
        self.artifact_root.join(artifact::GC_LOG_SUBDIR)
    }

    /// Directory thread snapshots are written to
    pub fn dump_dir(&self) -> PathBuf {
        self.artifact_root.join(artifact::DUMP_SUBDIR)
    }
}

fn parse_u64(field: &str, value: &str) -> ConfigResult<u64> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}
