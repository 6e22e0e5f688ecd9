// src/main.rs - Serial time server entry point
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use timekeeper_rs::config;
use timekeeper_rs::transport::{self, SerialConnector};
use timekeeper_rs::{ServerSettings, SystemClock, TimeServer};

#[derive(Debug, Parser)]
#[command(name = "timekeeper-host", version, about = "Serves the host's local time over a serial link")]
struct Cli {
    /// Path to the TOML configuration file (default: ./timekeeper.toml if present)
    #[arg(short, long)]
    config: Option<String>,

    /// Print the serial ports found on this machine and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.list_ports {
        let ports = transport::available_ports();
        if ports.is_empty() {
            tracing::info!("No serial ports found");
        }
        for port in ports {
            println!("{port}");
        }
        return ExitCode::SUCCESS;
    }

    let config = match config::resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "Serial: {} @ {} baud (read timeout {} ms)",
        config.serial.device,
        config.serial.baud,
        config.serial.read_timeout_ms
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
    });

    let mut server = TimeServer::new(
        SerialConnector::new(&config.serial),
        Arc::new(SystemClock),
        ServerSettings::from(&config),
    );

    match server.run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Unexpected error: {}", e);
            ExitCode::FAILURE
        }
    }
}
