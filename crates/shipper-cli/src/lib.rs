//! shipperctl library: argument parsing and command implementations

pub mod commands;
pub mod error;

use clap::{Parser, Subcommand};

pub use error::{Error, Result};

use commands::clean::CleanCommand;

/// Maintenance commands for a Shipper management cluster
#[derive(Parser, Debug)]
#[command(name = "shipperctl", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove stale state from the fleet
    #[command(subcommand)]
    Clean(CleanCommand),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Clean(cmd) => commands::clean::run(cmd).await,
        }
    }
}
