//! # thingy-bridge - BLE Sensor Aggregator Bridge
//!
//! Bridges a BLE aggregator that relays up to [`protocol::MAX_NODES`] Thingy
//! sensor nodes to a set of host-owned data points ("sinks"), one per node and
//! sensor.
//!
//! ## Features
//!
//! - **Wire codec**: fixed-layout little-endian frames with Q2.30, Q16.16 and
//!   per-axis fixed-point motion encodings.
//! - **Single supervised link**: single-flight connects, automatic reconnects,
//!   notification re-subscription after every reconnect.
//! - **Per-node liveness**: nodes that stop reporting are zeroed and flagged
//!   disconnected once per outage, and restored on their next frame.
//! - **Command sequencing**: LED and sensor toggles, configuration reads, and
//!   read-after-write configuration updates.
//! - **Custom node ids**: optionally address nodes by the number in their
//!   advertised name instead of the aggregator slot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thingy_bridge::bridge::Bridge;
//! use thingy_bridge::config::Config;
//! use thingy_bridge::sink::MemoryHost;
//! use thingy_bridge::transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("bridge.toml").await?;
//!     let host = Arc::new(MemoryHost::new());
//!     let transport = Arc::new(TcpTransport::new(
//!         config.aggregator.notify_channel.clone(),
//!         config.aggregator.command_channel.clone(),
//!     ));
//!     let bridge = Bridge::new(&config, host, transport);
//!     bridge.register_all(&config.sinks);
//!     bridge.readiness().signal();
//!     bridge.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - frame encode/decode, no I/O
//! - [`sink`] - host sink interface and the in-memory host
//! - [`nodes`] - node arena and node-id strategies
//! - [`registry`] - `(node, sensor) -> sink` map
//! - [`liveness`] - heartbeat watchdog
//! - [`dispatch`] - applies inbound frames
//! - [`supervisor`] - connection lifecycle and background tasks
//! - [`commands`] - command sequencer
//! - [`transport`] - transport traits, mock and TCP implementations
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌────────────┐  values  ┌──────────┐
//! │  Transport   │ ─────────► │  Dispatch  │ ───────► │  Sinks   │
//! └──────────────┘            └────────────┘          └──────────┘
//!        ▲                          │ liveness              │ trigger writes
//!        │ commands           ┌────────────┐          ┌──────────┐
//!        └─────────────────── │ Supervisor │ ◄─────── │ Commands │
//!                             └────────────┘          └──────────┘
//! ```

pub mod bridge;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod logutil;
pub mod metrics;
pub mod nodes;
pub mod protocol;
pub mod registry;
pub mod sink;
pub mod supervisor;
pub mod transport;

pub use error::{BridgeError, Result};
