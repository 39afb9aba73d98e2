//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Broker - publish/subscribe overlay with replicated data stores.
#[derive(Parser, Debug)]
#[command(name = "broker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ./broker.conf).
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a standalone broker node.
    Start(commands::StartArgs),
    /// Show metrics of a running node.
    Status(commands::StatusArgs),
    /// Validate a configuration file.
    Config(commands::ConfigArgs),
}
