//! apploy CLI
//!
//! Scripted and interactive builder for App manifest trees.

use clap::Parser;

use apploy_cli::Cli;
use apploy_common::telemetry::init_tracing;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;
    cli.run()?;
    Ok(())
}
