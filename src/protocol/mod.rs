//! # Aggregator Wire Protocol
//!
//! Pure encode/decode of the fixed-layout binary frames exchanged with the
//! aggregator. Nothing in here performs I/O or touches shared state, so every
//! function is safe to call from any task.
//!
//! ## Frame layout
//!
//! Inbound (notifications):
//!
//! ```text
//! byte 0    opcode
//! byte 1    reserved
//! byte 2    node slot id
//! byte 3..  opcode-specific payload, little-endian
//! ```
//!
//! Outbound (commands):
//!
//! ```text
//! byte 0    command opcode
//! byte 1    target slot id (LED toggle: LED state)
//! byte 2..  command-specific fields, little-endian
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use thingy_bridge::protocol::{decode, Frame, sensor};
//! use thingy_bridge::sink::SinkValue;
//!
//! let frame = decode(&[7, 0, 3, 21, 50]);
//! match frame {
//!     Frame::Readings { node, readings } => {
//!         assert_eq!(node, 3);
//!         assert_eq!(readings[0].sensor, sensor::TEMPERATURE);
//!         assert_eq!(readings[0].value, SinkValue::Number(21.5));
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod decode;
pub mod encode;
pub mod fixed;

pub use decode::decode;
pub use encode::{Command, ConfigGroup, ConnParams, EnvConfig, LedTarget, MotionConfig};

use crate::error::BridgeError;
use crate::sink::SinkValue;

/// Number of sensor node slots the aggregator can relay.
pub const MAX_NODES: u8 = 19;

/// Reserved node id representing the aggregator itself.
pub const AGGREGATOR_ID: u8 = MAX_NODES + 1;

/// Maximum length of a node's advertised Bluetooth name.
pub const MAX_NAME_LENGTH: usize = 15;

/// Characteristic carrying notifications from the aggregator.
pub const NOTIFY_CHANNEL: &str = "3e520003-1368-b682-4440-d7dd234c45bc";

/// Characteristic accepting command frames.
pub const COMMAND_CHANNEL: &str = "3e520002-1368-b682-4440-d7dd234c45bc";

/// Value written to connection sinks.
pub const CONNECTED: f64 = 1.0;
pub const DISCONNECTED: f64 = 0.0;

/// Text written to status sinks.
pub const STATUS_CONNECTED: &str = "CONNECTED";
pub const STATUS_DISCONNECTED: &str = "DISCONNECTED";

/// Sensor ids used as the second half of a registry key.
pub mod sensor {
    pub const CONNECTION: u8 = 0;
    pub const STATUS: u8 = 1;
    pub const RSSI: u8 = 2;
    pub const BATTERY: u8 = 3;
    pub const BUTTON: u8 = 4;
    pub const TEMPERATURE: u8 = 5;
    pub const HUMIDITY: u8 = 6;
    pub const PRESSURE: u8 = 7;
    pub const GAS: u8 = 8;
    pub const CO2: u8 = 9;
    pub const TVOC: u8 = 10;
    pub const TEMP_INTERVAL: u8 = 11;
    pub const PRESSURE_INTERVAL: u8 = 12;
    pub const HUMID_INTERVAL: u8 = 13;
    pub const GAS_MODE: u8 = 14;
    pub const QUATERNION_W: u8 = 15;
    pub const QUATERNION_X: u8 = 16;
    pub const QUATERNION_Y: u8 = 17;
    pub const QUATERNION_Z: u8 = 18;
    pub const ACCEL_X: u8 = 19;
    pub const ACCEL_Y: u8 = 20;
    pub const ACCEL_Z: u8 = 21;
    pub const GYRO_X: u8 = 22;
    pub const GYRO_Y: u8 = 23;
    pub const GYRO_Z: u8 = 24;
    pub const COMPASS_X: u8 = 25;
    pub const COMPASS_Y: u8 = 26;
    pub const COMPASS_Z: u8 = 27;
    pub const ROLL: u8 = 28;
    pub const PITCH: u8 = 29;
    pub const YAW: u8 = 30;
    pub const HEADING: u8 = 31;
    pub const STEP_INTERVAL: u8 = 32;
    pub const TEMP_COMP_INTERVAL: u8 = 33;
    pub const MAG_COMP_INTERVAL: u8 = 34;
    pub const MOTION_FREQ: u8 = 35;
    pub const WAKE_ON_MOTION: u8 = 36;
    pub const CONN_MIN_INTERVAL: u8 = 37;
    pub const CONN_MAX_INTERVAL: u8 = 38;
    pub const CONN_LATENCY: u8 = 39;
    pub const CONN_TIMEOUT: u8 = 40;
    pub const QUATERNION_TOGGLE: u8 = 41;
    pub const RAW_MOTION_TOGGLE: u8 = 42;
    pub const EULER_TOGGLE: u8 = 43;
    pub const HEADING_TOGGLE: u8 = 44;
    pub const DIGITAL_OUT_0: u8 = 45;
    pub const DIGITAL_OUT_1: u8 = 46;
    pub const DIGITAL_OUT_2: u8 = 47;
    pub const DIGITAL_OUT_3: u8 = 48;

    pub const QUATERNION: [u8; 4] = [QUATERNION_W, QUATERNION_X, QUATERNION_Y, QUATERNION_Z];
    pub const RAW_MOTION: [u8; 9] = [
        ACCEL_X, ACCEL_Y, ACCEL_Z, GYRO_X, GYRO_Y, GYRO_Z, COMPASS_X, COMPASS_Y, COMPASS_Z,
    ];
    pub const EULER: [u8; 3] = [ROLL, PITCH, YAW];
    pub const DIGITAL_OUT: [u8; 4] = [DIGITAL_OUT_0, DIGITAL_OUT_1, DIGITAL_OUT_2, DIGITAL_OUT_3];

    /// Toggle sinks mirror an on/off state rather than a measurement.
    pub fn is_toggle(id: u8) -> bool {
        matches!(
            id,
            QUATERNION_TOGGLE | RAW_MOTION_TOGGLE | EULER_TOGGLE | HEADING_TOGGLE
        )
    }

    /// Value sinks that go stale when `id` is switched off.
    pub fn dependents(id: u8) -> &'static [u8] {
        match id {
            GAS => &[CO2, TVOC],
            QUATERNION_TOGGLE => &QUATERNION,
            RAW_MOTION_TOGGLE => &RAW_MOTION,
            EULER_TOGGLE => &EULER,
            HEADING_TOGGLE => &[HEADING],
            _ => &[],
        }
    }
}

/// Inbound notification opcodes.
pub mod opcode {
    pub const CONNECT: u8 = 1;
    pub const DISCONNECT: u8 = 2;
    pub const BUTTON: u8 = 3;
    pub const BATTERY: u8 = 4;
    pub const RSSI: u8 = 6;
    pub const TEMPERATURE: u8 = 7;
    pub const PRESSURE: u8 = 8;
    pub const HUMIDITY: u8 = 9;
    pub const GAS: u8 = 10;
    pub const ENV_CONFIG: u8 = 11;
    pub const QUATERNIONS: u8 = 12;
    pub const RAW_MOTION: u8 = 13;
    pub const EULER: u8 = 14;
    pub const HEADING: u8 = 15;
    pub const MOTION_CONFIG: u8 = 16;
    pub const CONN_PARAM: u8 = 17;
    pub const DIGITAL_IO: u8 = 18;
}

/// Offsets shared by every inbound frame.
pub const RESP_OPCODE: usize = 0;
pub const RESP_ID: usize = 2;
/// Start of the advertised name inside a CONNECT frame.
pub const RESP_CONNECT_NAME: usize = 11;

/// One decoded value bound for the sink `(node, sensor)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor: u8,
    pub value: SinkValue,
}

impl SensorReading {
    pub fn number(sensor: u8, value: f64) -> Self {
        Self {
            sensor,
            value: SinkValue::Number(value),
        }
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Measurement values for one node.
    Readings {
        node: u8,
        readings: Vec<SensorReading>,
    },
    /// Confirmed configuration values, returned after a config read.
    Config {
        node: u8,
        group: ConfigGroup,
        readings: Vec<SensorReading>,
    },
    /// A node joined the aggregator and advertised `name`.
    Connect { node: u8, name: String },
    /// A node left the aggregator.
    Disconnect { node: u8 },
    /// Opcode this bridge does not understand. Logged and discarded.
    Unknown { opcode: u8, node: Option<u8> },
    /// Frame too short for its opcode's layout. Logged and discarded.
    Truncated {
        opcode: u8,
        node: Option<u8>,
        len: usize,
    },
}

impl Frame {
    /// Slot id of the node the frame came from, when the frame carries one.
    pub fn node(&self) -> Option<u8> {
        match self {
            Frame::Readings { node, .. }
            | Frame::Config { node, .. }
            | Frame::Connect { node, .. }
            | Frame::Disconnect { node } => Some(*node),
            Frame::Unknown { node, .. } | Frame::Truncated { node, .. } => *node,
        }
    }

    /// The decode problem this frame represents, if any.
    pub fn error(&self) -> Option<BridgeError> {
        match self {
            Frame::Unknown { opcode, .. } => Some(BridgeError::UnknownOpcode(*opcode)),
            Frame::Truncated { opcode, len, .. } => Some(BridgeError::Truncated {
                opcode: *opcode,
                len: *len,
            }),
            _ => None,
        }
    }
}

/// Extract a custom node id from an advertised name such as `Node7`.
///
/// Returns `None` when the name does not carry `prefix` followed by a decimal
/// number that fits in a node id.
pub fn custom_id_from_name(name: &str, prefix: &str) -> Option<u8> {
    let digits = name.trim().strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u8>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_id_parses_prefixed_names() {
        assert_eq!(custom_id_from_name("Node3", "Node"), Some(3));
        assert_eq!(custom_id_from_name("Node12 ", "Node"), Some(12));
        assert_eq!(custom_id_from_name("Node", "Node"), None);
        assert_eq!(custom_id_from_name("Thingy", "Node"), None);
        assert_eq!(custom_id_from_name("Node-1", "Node"), None);
        assert_eq!(custom_id_from_name("Node999", "Node"), None);
    }

    #[test]
    fn dependents_cover_toggle_groups() {
        assert_eq!(sensor::dependents(sensor::GAS), &[sensor::CO2, sensor::TVOC]);
        assert_eq!(sensor::dependents(sensor::RAW_MOTION_TOGGLE).len(), 9);
        assert!(sensor::dependents(sensor::TEMPERATURE).is_empty());
        assert!(sensor::is_toggle(sensor::EULER_TOGGLE));
        assert!(!sensor::is_toggle(sensor::GAS));
    }
}
