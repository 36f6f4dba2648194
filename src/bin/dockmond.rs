//! dockmon Daemon - Docker host monitoring agent
//!
//! This binary runs as a background daemon: it tracks the host's containers,
//! follows the engine's event feed and serves shared live metrics and log
//! streams to socket clients.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! dockmond start
//!
//! # Start the daemon (background/daemonized) with a config file
//! dockmond start -d --config /etc/dockmon/dockmond.toml
//!
//! # Stop the daemon
//! dockmond stop
//!
//! # Check daemon status
//! dockmond status
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dockmond::config::DaemonConfig;
use dockmond::controller::Controller;
use dockmond::engine::DockerEngine;
use dockmond::hub::spawn_hub;
use dockmond::inventory::{ContainerStore, Inventory};
use dockmond::server::DaemonServer;
use dockmond::sink::JsonlSink;

/// Default `tracing` directives when neither `RUST_LOG` nor `log_filter` is set.
const DEFAULT_LOG_FILTER: &str = "dockmond=info,dockmon_core=info";

/// dockmon daemon - Docker host monitor
#[derive(Parser, Debug)]
#[command(name = "dockmond", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("dockmon")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("dockmond.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("dockmond.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let Ok(pid) = i32::try_from(pid) else {
        bail!("Invalid PID {pid}");
    };
    // SAFETY: kill(2) with a plain signal number has no memory effects.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'dockmond stop' to stop it first.");
                process::exit(1);
            }

            // read before forking so config errors reach the terminal
            let config = DaemonConfig::load(config.as_deref()).context("Failed to load config")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = DaemonConfig::load(None).unwrap_or_default();
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn init_logging(config: &DaemonConfig) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => {
            let directives = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
            EnvFilter::try_new(directives).context("Invalid log_filter")?
        }
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "dockmon daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let engine = Arc::new(
        DockerEngine::connect()
            .await
            .context("Failed to connect to the Docker engine")?,
    );

    let inventory: Arc<dyn Inventory> = Arc::new(ContainerStore::new(engine.clone()));
    let sink = Arc::new(JsonlSink::new(&config.store_path));

    let controller = Controller::new(inventory.clone(), engine.clone(), engine.clone(), sink)
        .with_max_in_flight_writes(config.max_in_flight_writes);
    let tasks = controller
        .init(cancel_token.clone())
        .await
        .context("Controller startup failed")?;
    info!(store = %config.store_path.display(), "Controller started");

    let hub = spawn_hub(
        inventory.clone(),
        engine,
        config.hub(),
        cancel_token.clone(),
    );
    info!("Hub started");

    let server = DaemonServer::new(
        &config.socket_path,
        hub,
        inventory,
        controller.host(),
        cancel_token.clone(),
    );

    info!(socket = %config.socket_path.display(), "Starting server");

    let served = server.run().await;
    // a server error must still stop the other tasks
    cancel_token.cancel();
    tasks.join().await;

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("dockmon daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
