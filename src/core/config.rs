//! Configuration loading and validation.
//!
//! Configuration is drawn from three sources, in order of increasing
//! precedence:
//!
//! 1. the TOML file `broker.conf` in the current working directory (skipped
//!    when [`BrokerOptions::ignore_broker_conf`] is set),
//! 2. environment variables (`BROKER_CONSOLE_VERBOSITY`,
//!    `BROKER_FILE_VERBOSITY`, `BROKER_METRICS_PORT`,
//!    `BROKER_RECORDING_DIRECTORY`, `BROKER_OUTPUT_GENERATOR_FILE_CAP`),
//! 3. programmatic [`BrokerOptions`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file read from the working directory.
pub const CONFIG_FILE_NAME: &str = "broker.conf";

/// Programmatic options supplied by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOptions {
    /// If true, peer connections won't use TLS.
    #[serde(default)]
    pub disable_ssl: bool,

    /// If true, the endpoint forwards incoming messages to its peers.
    #[serde(default = "default_forward")]
    pub forward: bool,

    /// Hop limit inserted into forwarded messages by the first receiver.
    /// Messages are dropped once they traversed more than this many hops.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Whether stores keep time with the wall clock. When false, the
    /// application drives a simulated clock on its own.
    #[serde(default = "default_use_real_time")]
    pub use_real_time: bool,

    /// Whether to ignore the `broker.conf` file.
    #[serde(default)]
    pub ignore_broker_conf: bool,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            disable_ssl: false,
            forward: default_forward(),
            ttl: default_ttl(),
            use_real_time: default_use_real_time(),
            ignore_broker_conf: false,
        }
    }
}

/// Console/file log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    /// Output disabled entirely.
    Quiet,
}

impl Verbosity {
    /// Parse the values accepted in `BROKER_CONSOLE_VERBOSITY` and friends.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "quiet" => Some(Self::Quiet),
            _ => None,
        }
    }

    /// Filter directive understood by the tracing subscriber.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
            Self::Quiet => "off",
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Verbosity of console output.
    #[serde(default)]
    pub console_verbosity: Verbosity,

    /// Verbosity of file output.
    #[serde(default = "default_file_verbosity")]
    pub file_verbosity: Verbosity,

    /// Log file path, used when file output is enabled.
    #[serde(default = "default_log_file")]
    pub file_path: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console_verbosity: Verbosity::default(),
            file_verbosity: default_file_verbosity(),
            file_path: default_log_file(),
        }
    }
}

/// TLS material for peering connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpensslConfig {
    /// Certificate chain in PEM format.
    #[serde(default)]
    pub certificate: Option<String>,

    /// Private key in PEM format.
    #[serde(default)]
    pub key: Option<String>,

    /// Passphrase for the private key.
    #[serde(default)]
    pub passphrase: Option<String>,

    /// CA certificate bundle for verifying peers.
    #[serde(default)]
    pub cafile: Option<String>,

    /// Directory of trusted CA certificates.
    #[serde(default)]
    pub capath: Option<String>,
}

impl OpensslConfig {
    /// Whether any TLS material was supplied.
    pub fn configured(&self) -> bool {
        self.certificate.is_some() || self.key.is_some() || self.cafile.is_some()
    }
}

/// Channel tuning knobs for the reliable command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Interval between channel ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// A consumer acknowledges progress every `ack_interval` ticks.
    #[serde(default = "default_ack_interval")]
    pub ack_interval: u64,

    /// Ticks without progress before a consumer emits a NACK.
    #[serde(default = "default_nack_timeout")]
    pub nack_timeout: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            ack_interval: default_ack_interval(),
            nack_timeout: default_nack_timeout(),
        }
    }
}

/// Store tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Timeout for `put_unique` request/reply round trips, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a disconnected clone serves possibly-stale answers before it
    /// reports `stale_data`, in milliseconds.
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
        }
    }
}

/// Metrics exposure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Port for the Prometheus scrape endpoint; disabled when absent.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Benchmark recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory for recorded message meta data; disabled when absent.
    #[serde(default)]
    pub directory: Option<String>,

    /// Cap on the number of recorded messages per generator file.
    #[serde(default)]
    pub output_generator_file_cap: Option<u64>,
}

/// Top-level endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Programmatic options (also accepted from file for convenience).
    #[serde(default)]
    pub options: BrokerOptions,

    /// Logger configuration.
    #[serde(default)]
    pub logger: LoggerConfig,

    /// TLS material.
    #[serde(default)]
    pub openssl: OpensslConfig,

    /// Reliable channel tuning.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Store tuning.
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics exposure.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Benchmark recording.
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Config {
    /// Load configuration for the given options.
    ///
    /// Reads `broker.conf` from the working directory unless
    /// `ignore_broker_conf` is set, then applies environment overrides, then
    /// the options themselves.
    pub fn load(options: BrokerOptions) -> Result<Self> {
        let mut config = if !options.ignore_broker_conf && Path::new(CONFIG_FILE_NAME).exists() {
            Self::from_file(Path::new(CONFIG_FILE_NAME))?
        } else {
            Self::default()
        };
        config.apply_env();
        config.options = options;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("BROKER_CONSOLE_VERBOSITY") {
            if let Some(verbosity) = Verbosity::parse(&value) {
                self.logger.console_verbosity = verbosity;
            } else {
                tracing::warn!(value, "ignoring invalid BROKER_CONSOLE_VERBOSITY");
            }
        }
        if let Ok(value) = std::env::var("BROKER_FILE_VERBOSITY") {
            if let Some(verbosity) = Verbosity::parse(&value) {
                self.logger.file_verbosity = verbosity;
            } else {
                tracing::warn!(value, "ignoring invalid BROKER_FILE_VERBOSITY");
            }
        }
        if let Ok(value) = std::env::var("BROKER_METRICS_PORT") {
            match value.parse::<u16>() {
                Ok(port) => self.metrics.port = Some(port),
                Err(_) => tracing::warn!(value, "ignoring invalid BROKER_METRICS_PORT"),
            }
        }
        if let Ok(value) = std::env::var("BROKER_RECORDING_DIRECTORY") {
            if !value.is_empty() {
                self.recording.directory = Some(value);
            }
        }
        if let Ok(value) = std::env::var("BROKER_OUTPUT_GENERATOR_FILE_CAP") {
            match value.parse::<u64>() {
                Ok(cap) => self.recording.output_generator_file_cap = Some(cap),
                Err(_) => {
                    tracing::warn!(value, "ignoring invalid BROKER_OUTPUT_GENERATOR_FILE_CAP")
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.channel.ack_interval == 0 {
            anyhow::bail!("channel.ack_interval must be > 0");
        }
        if self.channel.nack_timeout == 0 {
            anyhow::bail!("channel.nack_timeout must be > 0");
        }
        if self.channel.tick_interval_ms == 0 {
            anyhow::bail!("channel.tick_interval_ms must be > 0");
        }
        if !self.options.disable_ssl {
            // A certificate without a key (or vice versa) cannot work.
            let cert = self.openssl.certificate.is_some();
            let key = self.openssl.key.is_some();
            if cert != key {
                anyhow::bail!("openssl.certificate and openssl.key must be set together");
            }
        }
        Ok(())
    }
}

fn default_forward() -> bool {
    true
}

fn default_ttl() -> u32 {
    20
}

fn default_use_real_time() -> bool {
    true
}

fn default_file_verbosity() -> Verbosity {
    Verbosity::Quiet
}

fn default_log_file() -> String {
    "broker.log".to_string()
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_ack_interval() -> u64 {
    1
}

fn default_nack_timeout() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_stale_threshold_ms() -> u64 {
    10_000
}
