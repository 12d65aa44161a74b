//! # Configuration
//!
//! TOML configuration for the bridge daemon.
//!
//! - [`AggregatorConfig`] - where the aggregator (or its relay) lives and which
//!   channels carry notifications and commands
//! - [`TimingConfig`] - heartbeat, reconnect and command sequencing delays
//! - [`NodesConfig`] - node id strategy
//! - [`LoggingConfig`] - log level and optional log file
//! - [`SinkConfig`] - static sink declarations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use thingy_bridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("bridge.toml").await?;
//!     let config = Config::load("bridge.toml").await?;
//!     println!("aggregator at {}", config.aggregator.address);
//!     Ok(())
//! }
//! ```
//!
//! ## File format
//!
//! ```toml
//! [aggregator]
//! address = "127.0.0.1:7200"
//!
//! [timing]
//! heartbeat_ms = 90000
//! reconnect_delay_ms = 3000
//!
//! [nodes]
//! custom_ids = true
//! custom_name_prefix = "Node"
//!
//! [[sinks]]
//! node = 3
//! sensor = 5
//! name = "node3:temperature"
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::commands::SequencerTiming;
use crate::protocol::{COMMAND_CHANNEL, NOTIFY_CHANNEL};
use crate::supervisor::LinkSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Transport address of the aggregator (`host:port` of the relay).
    pub address: String,
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
    #[serde(default = "default_command_channel")]
    pub command_channel: String,
}

fn default_notify_channel() -> String {
    NOTIFY_CHANNEL.to_string()
}

fn default_command_channel() -> String {
    COMMAND_CHANNEL.to_string()
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7200".to_string(),
            notify_channel: default_notify_channel(),
            command_channel: default_command_channel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Wait between refreshing a config field sink and reading it.
    pub refresh_delay_ms: u64,
    /// Wait between a config write and its read-back.
    pub confirm_delay_ms: u64,
    pub teardown_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 90_000,
            reconnect_delay_ms: 3_000,
            refresh_delay_ms: 100,
            confirm_delay_ms: 500,
            teardown_timeout_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    /// Address nodes by the number in their advertised name instead of
    /// the aggregator slot.
    pub custom_ids: bool,
    pub custom_name_prefix: String,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            custom_ids: false,
            custom_name_prefix: "Node".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// One sink the daemon registers at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub node: u8,
    pub sensor: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregator.address.trim().is_empty() {
            bail!("aggregator.address must not be empty");
        }
        if self.timing.heartbeat_ms == 0 {
            bail!("timing.heartbeat_ms must be greater than zero");
        }
        if self.timing.reconnect_delay_ms == 0 {
            bail!("timing.reconnect_delay_ms must be greater than zero");
        }
        if self.nodes.custom_ids && self.nodes.custom_name_prefix.is_empty() {
            bail!("nodes.custom_name_prefix must be set when custom_ids is enabled");
        }
        Ok(())
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            address: self.aggregator.address.clone(),
            notify_channel: self.aggregator.notify_channel.clone(),
            command_channel: self.aggregator.command_channel.clone(),
            heartbeat: self.timing.heartbeat(),
            reconnect_delay: self.timing.reconnect_delay(),
            teardown_timeout: self.timing.teardown_timeout(),
        }
    }

    pub fn sequencer_timing(&self) -> SequencerTiming {
        SequencerTiming {
            refresh_delay: self.timing.refresh_delay(),
            confirm_delay: self.timing.confirm_delay(),
        }
    }
}
