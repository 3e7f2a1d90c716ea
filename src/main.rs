//! # Microfab
//!
//! Loads the configuration from `MICROFAB_CONFIG`, starts the network and keeps it running
//! until SIGINT or SIGTERM. Exits 0 after a signal-triggered shutdown and 1 when the
//! configuration is invalid or start-up fails.

use std::process::ExitCode;

use microfab::lifecycle::{setup_tracing, Network, NetworkError};
use microfab::model::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing();

    match run().await {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(stage = e.stage().unwrap_or("configuration"), error = %e, "Failed to start network");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), NetworkError> {
    let config = Config::from_env()?;
    info!(domain = %config.domain, port = config.port, "Loaded configuration");

    let mut network = Network::new(config)?;
    network.start().await?;
    network.wait().await;
    Ok(())
}
