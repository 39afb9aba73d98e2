//! Broker - standalone node entrypoint.
//!
//! Usage:
//!   broker start [--host ADDR] [--port PORT] [--peer HOST:PORT]...
//!   broker status [--metrics-port PORT]
//!   broker config validate [--config FILE]

use anyhow::Result;
use broker::cli::commands::{run_config, run_start, run_status};
use broker::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);
    match cli.command {
        Commands::Start(args) => run_start(config_path, args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Config(args) => run_config(config_path, args),
    }
}
