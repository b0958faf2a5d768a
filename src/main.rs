//! CLI entry point for the Warsaw GTFS-Realtime generator.
//!
//! Produces one of: service alerts, the brigades table, or vehicle positions.
//! Alerts can be kept up to date in a loop.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use warsaw_gtfs_rt::config::{
    self, Config, DEFAULT_BRIGADES_FILE, DEFAULT_GTFS_FILE, DEFAULT_MAX_PROBE_FAILURES,
    DEFAULT_TARGET,
};
use warsaw_gtfs_rt::mode::ModeRequest;
use warsaw_gtfs_rt::runner;

#[derive(Parser)]
#[command(name = "warsaw_gtfs_rt")]
#[command(about = "Creates GTFS-Realtime feeds for Warsaw", long_about = None)]
struct Cli {
    /// Create GTFS-Realtime alerts
    #[arg(short, long)]
    alerts: bool,

    /// Create brigades.json
    #[arg(short, long)]
    brigades: bool,

    /// Create GTFS-Realtime vehicle positions
    #[arg(short, long)]
    positions: bool,

    /// Key for api.um.warszawa.pl (required for brigades and positions)
    #[arg(short = 'k', long, env = "WARSAW_APIKEY", hide_env_values = true)]
    apikey: Option<String>,

    /// Path or URL of the static GTFS
    #[arg(long, default_value = DEFAULT_GTFS_FILE)]
    gtfs_file: String,

    /// Path or URL of brigades.json (positions only)
    #[arg(long, default_value = DEFAULT_BRIGADES_FILE)]
    brigades_file: String,

    /// Directory for the created files
    #[arg(long, default_value = DEFAULT_TARGET)]
    target: PathBuf,

    /// Also write a JSON copy of alerts or positions
    #[arg(long)]
    json: bool,

    /// Write human-readable feeds instead of binary protobuf
    #[arg(long)]
    readable: bool,

    /// Fail on errors that would otherwise be skipped
    #[arg(long)]
    strict: bool,

    /// Regenerate alerts this often; 0 runs once
    #[arg(long = "loop", value_name = "DURATION", default_value = "0", value_parser = config::parse_duration)]
    loop_every: Duration,

    /// How often to check the GTFS for changes in loop mode
    #[arg(long = "checkdata", value_name = "DURATION", default_value = "30m", value_parser = config::parse_duration)]
    check_every: Duration,

    /// Give up after this many failed change checks in a row; 0 never gives up
    #[arg(long, default_value_t = DEFAULT_MAX_PROBE_FAILURES)]
    max_probe_failures: u32,

    /// Regenerate every loop cycle, even when the GTFS did not change
    #[arg(long)]
    regenerate_unchanged: bool,

    /// Timeout of a single HTTP request
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = config::parse_duration)]
    http_timeout: Duration,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            modes: ModeRequest {
                alerts: cli.alerts,
                brigades: cli.brigades,
                positions: cli.positions,
            },
            apikey: cli.apikey,
            gtfs_file: cli.gtfs_file,
            brigades_file: cli.brigades_file,
            target: cli.target,
            json: cli.json,
            readable: cli.readable,
            strict: cli.strict,
            loop_every: cli.loop_every,
            check_every: cli.check_every,
            max_probe_failures: cli.max_probe_failures,
            regenerate_unchanged: cli.regenerate_unchanged,
            http_timeout: cli.http_timeout,
        }
    }
}

/// Colored stderr + JSON rolling log file.
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/warsaw_gtfs_rt.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("warsaw_gtfs_rt.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, finishing"),
        Err(e) => {
            warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok(); // Load .env file
    let _file_guard = init_logging()?;

    let config = Config::from(Cli::parse());

    match runner::run(&config, shutdown_signal()).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(error = %format!("{:#}", anyhow::Error::from(err)), "Fatal error");
            Ok(ExitCode::FAILURE)
        }
    }
}
