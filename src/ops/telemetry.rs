//! Logging setup.
//!
//! Console and file output have independent verbosity levels, sourced from
//! the configuration after environment overrides (`BROKER_CONSOLE_VERBOSITY`
//! and `BROKER_FILE_VERBOSITY`) were applied.

use crate::core::config::{LoggerConfig, Verbosity};
use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// Safe to call once per process; typically done by the CLI, not by
/// embedding applications.
pub fn init(config: &LoggerConfig) -> Result<()> {
    let console = if config.console_verbosity != Verbosity::Quiet {
        let filter = EnvFilter::try_new(config.console_verbosity.as_filter())
            .context("invalid console verbosity")?;
        Some(fmt::layer().with_target(false).with_filter(filter))
    } else {
        None
    };

    let file = if config.file_verbosity != Verbosity::Quiet {
        let filter = EnvFilter::try_new(config.file_verbosity.as_filter())
            .context("invalid file verbosity")?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)
            .with_context(|| format!("failed to open log file {}", config.file_path))?;
        Some(
            fmt::layer()
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("logging already initialized")?;
    Ok(())
}
