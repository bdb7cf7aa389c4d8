//! shipperctl - maintenance commands for a Shipper management cluster

use clap::Parser;

use shipper_cli::{Cli, Result};
use shipper_common::telemetry::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LoggingConfig::plain("info"))
        .map_err(|e| shipper_cli::Error::command_failed(e.to_string()))?;

    Cli::parse().run().await
}
