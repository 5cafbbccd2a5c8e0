//! fanbridge Daemon (fanbridged)
//!
//! Runs the curve reconciliation loop and serves curve management requests
//! over a Unix domain socket.
//!
//! # Security Model
//! - **Socket**: Unix domain socket, owner/group only (0660)
//! - **Audit**: Peer credential logging (UID/GID/PID) for every write
//! - **Limits**: Connection limits, message size limits, read/write timeouts
//! - **Isolation**: Restrictive umask, working directory set to /
//! - **Signals**: Graceful shutdown with socket cleanup

mod control_loop;
mod server;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use fb_core::{
    CurveStore, DaemonConfig, DeviceControl, Engine, HttpSensorSource, LiquidctlController,
    SensorSource,
};

use crate::control_loop::ControlState;
use crate::server::Services;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "FANBRIDGE_LOG";

// ============================================================================
// Hardening
// ============================================================================

/// Files are created owner/group only
fn set_secure_umask() {
    // SAFETY: umask only swaps the process file creation mask.
    unsafe { libc::umask(0o007) };
    debug!("Umask set to 0007");
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

fn check_privileges() {
    // SAFETY: geteuid only returns the effective user id.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!(
            "Running as uid {} - liquidctl may lack access to USB/HID devices",
            euid
        );
    }
}

fn cleanup(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("fanbridged {} - fanbridge curve daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    fanbridged [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default: <config dir>/fanbridge/config.json)");
    eprintln!("    -s, --socket PATH   Socket path (overrides the configuration)");
    eprintln!("    -f, --foreground    Run in foreground (always on)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    FANBRIDGE_LOG         Log level (trace, debug, info, warn, error)");
    eprintln!("    FANBRIDGE_SENSOR_URL  Hardware monitor data.json URL");
    eprintln!("    FANBRIDGE_LIQUIDCTL   liquidctl binary");
    eprintln!("    FANBRIDGE_STATE_DIR   Directory holding curves.json");
}

fn print_version() {
    println!("fanbridged {}", VERSION);
}

/// Parsed command line
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    socket: Option<PathBuf>,
}

enum ParseOutcome {
    Run(Args),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<ParseOutcome, String> {
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::Help),
            "-v" | "--version" => return Ok(ParseOutcome::Version),
            "-f" | "--foreground" => {
                // no daemonization; a service manager supervises the process
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-s" | "--socket" => {
                i += 1;
                let path = args.get(i).ok_or("--socket requires a path argument")?;
                parsed.socket = Some(PathBuf::from(path));
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok(ParseOutcome::Run(parsed))
}

/// Journald when the journal socket exists, stdout otherwise.
/// Returns true when logging to the journal.
fn init_logging(log_level: &str) -> bool {
    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(ParseOutcome::Run(args)) => args,
        Ok(ParseOutcome::Help) => {
            print_help();
            return Ok(());
        }
        Ok(ParseOutcome::Version) => {
            print_version();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    set_secure_umask();
    secure_working_directory();

    info!("STARTUP: fanbridged {} starting", VERSION);
    info!(
        "STARTUP: Logging to {}",
        if use_journald { "systemd journal" } else { "stdout" }
    );
    check_privileges();

    let config = DaemonConfig::load(args.config.as_deref());
    let socket_path = args.socket.unwrap_or_else(|| config.socket_path());

    let store = Arc::new(CurveStore::open(config.curves_path()));
    info!("STARTUP: Curves file: {}", store.path().display());
    let sensors: Arc<dyn SensorSource> = Arc::new(
        HttpSensorSource::new(config.sensor_url.clone(), config.sensor_timeout())
            .map_err(|e| anyhow::anyhow!("Failed to build sensor client: {}", e))?,
    );
    let devices: Arc<dyn DeviceControl> = Arc::new(LiquidctlController::new(
        config.utility_path.clone(),
        config.utility_timeouts(),
    ));

    if devices.is_installed().await {
        info!("STARTUP: Using {}", config.utility_path);
    } else {
        warn!(
            "STARTUP: {} is not installed or not runnable; curves will not be applied",
            config.utility_path
        );
    }

    let engine = Arc::new(Engine::new(store.clone(), sensors.clone(), devices.clone()));
    let control = Arc::new(ControlState::new(engine, config.poll_interval()));
    let services = Arc::new(Services {
        store,
        sensors,
        devices,
        control: control.clone(),
    });

    let handler_socket = socket_path.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        cleanup(&handler_socket);
        info!("SHUTDOWN: Daemon terminated gracefully");
        std::process::exit(0);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    info!("STARTUP: Socket path: {}", socket_path.display());
    info!("STARTUP: Sensor URL: {}", config.sensor_url);
    info!("STARTUP: PID: {}", std::process::id());

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let loop_handle = tokio::spawn(control_loop::run_control_loop(
        control,
        shutdown_flag.clone(),
    ));

    let result = server::run_server(&socket_path, services).await;

    shutdown_flag.store(true, Ordering::SeqCst);
    loop_handle.abort();
    cleanup(&socket_path);

    if let Err(e) = result {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
