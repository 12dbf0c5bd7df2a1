use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use delay_api::PayloadFormat;
use delay_pipeline::config::DelayConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "delay-server", about = "Holds incoming events for a fixed delay, then forwards them to a sink")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read events from stdin and deliver them after the configured delay
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// `delay`, `batch_size`, `out`, `[sink]` and the scheduler knobs.
    #[serde(flatten)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub input: InputConfig,
    /// Seconds to wait for the final drain after input ends.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f64,
}

/// How stdin lines become payloads.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    #[serde(default)]
    pub format: PayloadFormat,
}

fn default_shutdown_timeout() -> f64 {
    30.0
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn shutdown_timeout_duration(&self) -> Result<Duration, ServerError> {
        Duration::try_from_secs_f64(self.shutdown_timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ServerError::Config {
                context: "shutdown_timeout",
                detail: format!("must be a positive number of seconds, got {}", self.shutdown_timeout),
            })
    }
}
