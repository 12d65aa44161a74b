//! Transport abstraction for the aggregator link.
//!
//! A [`Transport`] produces [`Connection`]s; a connection exposes named
//! channels (characteristic UUIDs on a BLE link) that can be written to or
//! subscribed to. The supervisor only ever holds one connection at a time.
//!
//! - [`mock::MockTransport`]: scriptable in-process link for tests.
//! - [`tcp::TcpTransport`]: SLIP-framed frames over TCP to a BLE relay.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod mock;
pub mod slip;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use mock::MockTransport;
#[cfg(feature = "tcp")]
pub use tcp::TcpTransport;

/// Invoked by the connection when the link drops without a local
/// `disconnect()`.
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync + 'static>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Write one frame to `channel`.
    async fn write(&self, channel: &str, frame: &[u8]) -> Result<()>;

    /// Start receiving frames published on `channel`. A new subscription
    /// replaces any previous one for the same channel.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Bytes>>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Register the handler for unexpected link loss. Replaces any earlier one.
    fn on_disconnect(&self, handler: DisconnectHandler);

    async fn disconnect(&self) -> Result<()>;
}
