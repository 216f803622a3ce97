//! Autod CLI binary.
//!
//! Remote automation session server.
//!
//! # Commands
//!
//! - `serve` - Start the HTTP server backed by the fake driver
//! - `check-caps` - Negotiate a new-session body and print the result

use std::io::{self, Read};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use autod::{
    driver::{Driver, FakeDriver},
    negotiate,
    server::{create_router, AppState},
    Config, VERSION,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autod")]
#[command(version = VERSION)]
#[command(about = "Autod - remote automation session server (JSONWP + W3C)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen port (default from config, then 4723)
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Default idle timeout in seconds (0 disables)
        #[arg(long)]
        new_command_timeout: Option<u64>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },

    /// Negotiate capabilities against the fake driver
    CheckCaps {
        /// New-session body as JSON (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            bind_all,
            config,
            new_command_timeout,
            verbose,
            json_logs,
        } => cmd_serve(
            port,
            host,
            bind_all,
            config,
            new_command_timeout,
            verbose,
            json_logs,
        ),

        Commands::CheckCaps { input, file } => cmd_check_caps(input, file),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn cmd_serve(
    port: Option<u16>,
    host: Option<String>,
    bind_all: bool,
    config_path: Option<PathBuf>,
    new_command_timeout: Option<u64>,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    // Initialize logging
    init_logging(verbose, json_logs);

    // File + env, then CLI flags on top
    let mut file_config = Config::load(config_path.as_deref())?;
    if let Some(host) = host {
        host.parse::<IpAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid host '{host}': {e}"))?;
        file_config.server.host = host;
    }
    if let Some(port) = port {
        file_config.server.port = port;
    }
    if let Some(secs) = new_command_timeout {
        file_config.sessions.new_command_timeout_secs = secs;
    }

    let mut config = file_config.to_server_config()?;
    if bind_all {
        config = config.bind_all();
    }

    let driver: Arc<dyn Driver> = Arc::new(FakeDriver::new());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let state = Arc::new(AppState::new(config.clone(), driver));
        let watchdog = state.sessions.spawn_watchdog(config.watchdog_interval);
        let app = create_router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(config.addr).await?;
        info!("Autod v{VERSION} REST http interface listener started on {}", config.addr);
        info!(
            driver = state.sessions.driver().name(),
            new_command_timeout_secs = config.new_command_timeout.map(|t| t.as_secs()),
            max_sessions = config.max_sessions,
            "Accepting sessions"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let terminated = state.sessions.shutdown().await;
        watchdog.abort();
        info!(terminated, "Autod stopped");
        Ok::<_, anyhow::Error>(())
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, terminating sessions");
}

fn cmd_check_caps(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let body: Value = serde_json::from_str(&content)?;

    let constraints = FakeDriver::new().declare_constraints();
    match negotiate(&body, &constraints) {
        Ok(negotiated) => {
            println!("Protocol: {}", negotiated.protocol);
            if let Some(index) = negotiated.first_match_index {
                println!("firstMatch entry: {index}");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&negotiated.capabilities.to_json())?
            );
            Ok(())
        },
        Err(err) => Err(anyhow::anyhow!("{} ({})", err, err.w3c_code())),
    }
}

// Helper functions

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input.filter(|s| s != "-") {
        Ok(s)
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
