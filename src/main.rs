//! nbsocks - Non-blocking SOCKS5 Proxy
//!
//! This is the main entry point for the nbsocks application.

use anyhow::Result;
use clap::Parser;
use nbsocks::config::{load_config, Config};
use nbsocks::Reactor;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// nbsocks - single-reactor SOCKS5 proxy with an embedded DNS resolver
#[derive(Parser, Debug)]
#[command(name = "nbsocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the configured listen port)
    port: Option<u16>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream DNS server (overrides the configured one)
    #[arg(long)]
    dns: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_logging(&args.log_level, args.json_log) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    if let Some(port) = args.port {
        config.server.set_port(port);
    }
    if let Some(dns) = args.dns {
        config.dns.server = Some(dns);
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("nbsocks v{}", nbsocks::VERSION);

    let mut reactor = Reactor::bind(&config)?;
    info!("Using DNS server {}", reactor.dns_server());

    // Handle Ctrl+C by waking the reactor
    let shutdown = reactor.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        if let Err(e) = shutdown.shutdown() {
            error!("Failed to signal shutdown: {}", e);
        }
    })?;

    reactor.run()?;
    info!("nbsocks stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
