//! CLI command implementations.

use crate::core::config::Config;
use crate::endpoint::Endpoint;
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Arguments for `broker start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to listen on for peerings.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on; 0 picks a free port.
    #[arg(long, default_value_t = 9999)]
    pub port: u16,

    /// Peers to connect to, as host:port pairs.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Disable TLS for peerings.
    #[arg(long)]
    pub disable_ssl: bool,
}

/// Arguments for `broker status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Metrics port of the running node.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,
}

/// Arguments for `broker config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Parse and validate the configuration file.
    Validate,
}

fn load_config(path: Option<&PathBuf>, disable_ssl: bool) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None if Path::new(crate::core::config::CONFIG_FILE_NAME).exists() => {
            Config::from_file(Path::new(crate::core::config::CONFIG_FILE_NAME))?
        }
        None => Config::default(),
    };
    config.apply_env();
    if disable_ssl {
        config.options.disable_ssl = true;
    }
    config.validate()?;
    Ok(config)
}

/// Run a standalone broker node until interrupted.
pub async fn run_start(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let config = load_config(config_path.as_ref(), args.disable_ssl)?;
    crate::ops::telemetry::init(&config.logger)?;

    let endpoint = Endpoint::with_config(config)?;
    let port = endpoint
        .listen(&args.host, args.port)
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen: {}", e))?;
    info!(host = %args.host, port, node = %endpoint.node_id(), "broker node up");

    for peer in &args.peers {
        let (host, port) = parse_host_port(peer)?;
        endpoint.peer_nosync(&host, port, Duration::from_secs(5));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for interrupt")?;
    info!("interrupted, shutting down");
    endpoint.shutdown().await;
    Ok(())
}

/// Print the metrics snapshot of a running node.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", args.metrics_port))
        .await
        .with_context(|| format!("no metrics endpoint on port {}", args.metrics_port))?;
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    match response.split_once("\r\n\r\n") {
        Some((_, body)) => print!("{}", body),
        None => print!("{}", response),
    }
    Ok(())
}

/// Validate a configuration file.
pub fn run_config(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Validate => {
            load_config(config_path.as_ref(), false)?;
            println!("configuration ok");
            Ok(())
        }
    }
}

fn parse_host_port(spec: &str) -> Result<(String, u16)> {
    let (host, port) = spec
        .rsplit_once(':')
        .with_context(|| format!("expected host:port, got {}", spec))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in {}", spec))?;
    Ok((host.to_string(), port))
}
