//! diagshipd entry point
//!
//! Two real commands exist: `schedule` runs the collection loop until the
//! process is terminated, `dump` captures a single thread snapshot and
//! exits. `config` and `health` are operator conveniences.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use diagship_daemon::config::DaemonConfig;
use diagship_daemon::dump::{DumpGenerator, ProcfsInspector};
use diagship_daemon::error::{ConfigError, Result};
use diagship_daemon::remote_config;
use diagship_daemon::service::DaemonService;

/// Diagnostic artifact collection daemon
#[derive(Parser)]
#[command(name = "diagshipd")]
#[command(about = "Ships GC logs and thread snapshots of a monitored process to a remote collector")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML); environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collection scheduler until terminated
    Schedule,

    /// Capture a single thread snapshot and exit
    Dump,

    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Run local preflight checks
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("command failed: {err}");
        eprintln!("diagshipd: {err}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Schedule => {
            let mut config = DaemonConfig::load(cli.config.as_deref())?;
            let _guard = init_logging(&config);
            remote_config::apply_overrides(&mut config).await;
            config.validate()?;

            DaemonService::run(Arc::new(config)).await
        }
        Commands::Dump => {
            // Best effort: a broken configuration should not prevent an
            // operator from grabbing a snapshot with the defaults
            let config = match DaemonConfig::load(cli.config.as_deref()) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("diagshipd: configuration invalid ({err}), capturing with defaults");
                    DaemonConfig::default()
                }
            };
            let _guard = init_logging(&config);

            let generator = DumpGenerator::new(&config, ProcfsInspector::from_config(&config));
            let path = generator.capture()?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Config { show } => {
            let config = DaemonConfig::load(cli.config.as_deref())?;
            config.validate()?;
            if show {
                let rendered = toml::to_string_pretty(&config)
                    .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;
                println!("{rendered}");
            } else {
                println!("configuration is valid");
            }
            Ok(())
        }
        Commands::Health => {
            let config = DaemonConfig::load(cli.config.as_deref())?;
            health_check(&config)
        }
    }
}

/// Local-only preflight: configuration, artifact directories, collector URL
/// shape. Deliberately makes no network calls, so it is safe in `off` mode.
fn health_check(config: &DaemonConfig) -> Result<()> {
    config.validate()?;
    println!("configuration: ok");

    std::fs::create_dir_all(config.gclog_dir())?;
    std::fs::create_dir_all(config.dump_dir())?;
    println!("artifact root: writable ({})", config.artifact_root.display());

    if config.remote_enabled() {
        reqwest::Url::parse(&config.collector.base_url).map_err(|_| ConfigError::InvalidValue {
            field: "collector_url".to_string(),
            value: config.collector.base_url.clone(),
        })?;
        println!("collector url: well-formed");
    } else {
        println!("mode off: remote interaction disabled");
    }

    println!("health check passed");
    Ok(())
}

/// Initialize tracing: console layer when enabled, plus an optional daily
/// rolling file. Returns the appender guard that must outlive the process.
fn init_logging(config: &DaemonConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "diagship_daemon={level},diagshipd={level}",
            level = config.logging.level
        ))
    });

    let (file_layer, guard) = match &config.logging.file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "diagshipd.log".to_string());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.logging.console {
        registry.with(fmt::layer().with_target(false)).init();
    } else {
        registry.init();
    }

    info!("logging initialized");
    guard
}
