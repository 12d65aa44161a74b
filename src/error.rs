use thiserror::Error;

/// Errors raised by the bridge core.
///
/// None of these are fatal to the process. Most are logged at the point they
/// occur and surface to users only through sink state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    /// The transport refused or failed the connect call.
    #[error("failed to connect to aggregator: {0}")]
    TransportConnect(String),

    /// The transport reported the connection dropped.
    #[error("connection to aggregator lost")]
    UnexpectedDisconnect,

    /// A send was attempted with no live connection.
    #[error("not connected to aggregator")]
    NotConnected,

    /// Write/subscribe/disconnect failure on an established connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// No sink registered for this pair. Expected for partial node setups.
    #[error("no sink for node {node} sensor {sensor}")]
    SinkNotFound { node: u8, sensor: u8 },

    /// Node id outside the managed range.
    #[error("node {node} exceeds MAX_NODES")]
    CapacityExceeded { node: i32 },

    /// External node id that no slot currently answers to.
    #[error("node {0} is not bound to any slot")]
    UnknownNode(u8),

    /// Another slot already owns the proposed custom id.
    #[error("custom id {custom_id} already assigned to slot {owner}")]
    CustomIdCollision { custom_id: u8, owner: u8 },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    /// Frame shorter than the layout its opcode requires.
    #[error("truncated frame (opcode {opcode}, {len} bytes)")]
    Truncated { opcode: u8, len: usize },

    /// A dependent sink had no pending value; composite writes abort on this.
    #[error("no value for node {node} sensor {sensor}")]
    MissingValue { node: u8, sensor: u8 },

    #[error("teardown failed: {0}")]
    Teardown(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
