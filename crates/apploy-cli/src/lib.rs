//! apploy CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use apploy_common::telemetry::LogFormat;
use clap::{Parser, Subcommand};

/// apploy - build App trees and write their Kubernetes manifests
#[derive(Parser, Debug)]
#[command(name = "apploy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "APPLOY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an App from a script or stdin and write its manifests
    Build(commands::build::BuildArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Build(args) => commands::build::run(args),
        }
    }
}
