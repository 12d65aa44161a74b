//! Outbound command frames.

use bytes::BufMut;

use super::{fixed, sensor, AGGREGATOR_ID};

/// Sink values are floats; wire fields are unsigned 16-bit.
fn to_u16(v: f64) -> u16 {
    v.round().clamp(0.0, u16::MAX as f64) as u16
}

/// Command opcodes understood by the aggregator.
pub mod command {
    pub const LED_TOGGLE: u8 = 2;
    pub const ENV_CONFIG_READ: u8 = 6;
    pub const ENV_CONFIG_WRITE: u8 = 7;
    pub const MOTION_CONFIG_READ: u8 = 8;
    pub const MOTION_CONFIG_WRITE: u8 = 9;
    pub const SET_SENSOR: u8 = 10;
    pub const CONN_PARAM_READ: u8 = 11;
    pub const CONN_PARAM_WRITE: u8 = 12;
    pub const DIGITAL_IO_WRITE: u8 = 13;
    pub const DIGITAL_IO_READ: u8 = 14;
}

/// Configuration groups written as a single multi-field frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigGroup {
    Environment,
    Motion,
    ConnParams,
    DigitalIo,
}

impl ConfigGroup {
    /// The read command that pulls back the confirmed values for this group.
    pub fn read_command(self, slot: u8) -> Command {
        match self {
            ConfigGroup::Environment => Command::EnvConfigRead { slot },
            ConfigGroup::Motion => Command::MotionConfigRead { slot },
            ConfigGroup::ConnParams => Command::ConnParamRead { slot },
            ConfigGroup::DigitalIo => Command::DigitalIoRead { slot },
        }
    }

    /// Sinks holding the group's fields, in frame order.
    pub fn sensors(self) -> &'static [u8] {
        match self {
            ConfigGroup::Environment => &[
                sensor::TEMP_INTERVAL,
                sensor::PRESSURE_INTERVAL,
                sensor::HUMID_INTERVAL,
                sensor::GAS_MODE,
            ],
            ConfigGroup::Motion => &[
                sensor::STEP_INTERVAL,
                sensor::TEMP_COMP_INTERVAL,
                sensor::MAG_COMP_INTERVAL,
                sensor::MOTION_FREQ,
                sensor::WAKE_ON_MOTION,
            ],
            ConfigGroup::ConnParams => &[
                sensor::CONN_MIN_INTERVAL,
                sensor::CONN_MAX_INTERVAL,
                sensor::CONN_LATENCY,
                sensor::CONN_TIMEOUT,
            ],
            ConfigGroup::DigitalIo => &sensor::DIGITAL_OUT,
        }
    }

    /// Write command from field values given in [`sensors`](Self::sensors)
    /// order. `None` when the value count does not match.
    pub fn write_command(self, slot: u8, values: &[f64]) -> Option<Command> {
        if values.len() != self.sensors().len() {
            return None;
        }
        let cmd = match self {
            ConfigGroup::Environment => Command::EnvConfigWrite {
                slot,
                config: EnvConfig {
                    temperature_interval_ms: to_u16(values[0]),
                    pressure_interval_ms: to_u16(values[1]),
                    humidity_interval_ms: to_u16(values[2]),
                    gas_mode: to_u16(values[3]).min(u8::MAX as u16) as u8,
                },
            },
            ConfigGroup::Motion => Command::MotionConfigWrite {
                slot,
                config: MotionConfig {
                    step_interval_ms: to_u16(values[0]),
                    temp_comp_interval_ms: to_u16(values[1]),
                    mag_comp_interval_ms: to_u16(values[2]),
                    frequency_hz: to_u16(values[3]),
                    wake_on_motion: values[4] != 0.0,
                },
            },
            ConfigGroup::ConnParams => Command::ConnParamWrite {
                slot,
                params: ConnParams {
                    min_interval_ms: values[0],
                    max_interval_ms: values[1],
                    latency: to_u16(values[2]),
                    timeout_ms: values[3],
                },
            },
            ConfigGroup::DigitalIo => Command::DigitalIoWrite {
                slot,
                outputs: [
                    values[0] != 0.0,
                    values[1] != 0.0,
                    values[2] != 0.0,
                    values[3] != 0.0,
                ],
            },
        };
        Some(cmd)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConfigGroup::Environment => "environment",
            ConfigGroup::Motion => "motion",
            ConfigGroup::ConnParams => "connection parameters",
            ConfigGroup::DigitalIo => "digital io",
        }
    }
}

/// Which LEDs a toggle addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedTarget {
    All,
    Node(u8),
}

impl LedTarget {
    /// The aggregator id stands for "every node".
    pub fn from_node_id(id: u8) -> Self {
        if id == AGGREGATOR_ID {
            LedTarget::All
        } else {
            LedTarget::Node(id)
        }
    }
}

/// Environment sensor sampling configuration (intervals in ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvConfig {
    pub temperature_interval_ms: u16,
    pub pressure_interval_ms: u16,
    pub humidity_interval_ms: u16,
    pub gas_mode: u8,
}

/// Motion processing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionConfig {
    pub step_interval_ms: u16,
    pub temp_comp_interval_ms: u16,
    pub mag_comp_interval_ms: u16,
    pub frequency_hz: u16,
    pub wake_on_motion: bool,
}

/// BLE connection parameters in milliseconds (latency in connection events).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnParams {
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub latency: u16,
    pub timeout_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LedToggle { target: LedTarget, on: bool },
    EnvConfigRead { slot: u8 },
    EnvConfigWrite { slot: u8, config: EnvConfig },
    MotionConfigRead { slot: u8 },
    MotionConfigWrite { slot: u8, config: MotionConfig },
    SetSensor { slot: u8, sensor: u8, enable: bool },
    ConnParamRead { slot: u8 },
    ConnParamWrite { slot: u8, params: ConnParams },
    DigitalIoRead { slot: u8 },
    DigitalIoWrite { slot: u8, outputs: [bool; 4] },
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::LedToggle { .. } => command::LED_TOGGLE,
            Command::EnvConfigRead { .. } => command::ENV_CONFIG_READ,
            Command::EnvConfigWrite { .. } => command::ENV_CONFIG_WRITE,
            Command::MotionConfigRead { .. } => command::MOTION_CONFIG_READ,
            Command::MotionConfigWrite { .. } => command::MOTION_CONFIG_WRITE,
            Command::SetSensor { .. } => command::SET_SENSOR,
            Command::ConnParamRead { .. } => command::CONN_PARAM_READ,
            Command::ConnParamWrite { .. } => command::CONN_PARAM_WRITE,
            Command::DigitalIoRead { .. } => command::DIGITAL_IO_READ,
            Command::DigitalIoWrite { .. } => command::DIGITAL_IO_WRITE,
        }
    }

    /// Target slot for node-addressed commands; `None` for LED toggles.
    pub fn slot(&self) -> Option<u8> {
        match self {
            Command::LedToggle { .. } => None,
            Command::EnvConfigRead { slot }
            | Command::EnvConfigWrite { slot, .. }
            | Command::MotionConfigRead { slot }
            | Command::MotionConfigWrite { slot, .. }
            | Command::SetSensor { slot, .. }
            | Command::ConnParamRead { slot }
            | Command::ConnParamWrite { slot, .. }
            | Command::DigitalIoRead { slot }
            | Command::DigitalIoWrite { slot, .. } => Some(*slot),
        }
    }

    /// Build the wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.put_u8(self.opcode());
        match self {
            Command::LedToggle { target, on } => {
                out.put_u8(*on as u8);
                let mut mask = [0u8; 3];
                match target {
                    LedTarget::All => mask = [0xFF; 3],
                    LedTarget::Node(slot) => {
                        let byte = (*slot / 8) as usize;
                        if let Some(b) = mask.get_mut(byte) {
                            *b = 1 << (slot % 8);
                        }
                    }
                }
                out.put_slice(&mask);
            }
            Command::EnvConfigRead { slot }
            | Command::MotionConfigRead { slot }
            | Command::ConnParamRead { slot }
            | Command::DigitalIoRead { slot } => out.put_u8(*slot),
            Command::EnvConfigWrite { slot, config } => {
                out.put_u8(*slot);
                out.put_u16_le(config.temperature_interval_ms);
                out.put_u16_le(config.pressure_interval_ms);
                out.put_u16_le(config.humidity_interval_ms);
                out.put_u8(config.gas_mode);
            }
            Command::MotionConfigWrite { slot, config } => {
                out.put_u8(*slot);
                out.put_u16_le(config.step_interval_ms);
                out.put_u16_le(config.temp_comp_interval_ms);
                out.put_u16_le(config.mag_comp_interval_ms);
                out.put_u16_le(config.frequency_hz);
                out.put_u8(config.wake_on_motion as u8);
            }
            Command::SetSensor {
                slot,
                sensor,
                enable,
            } => {
                out.put_u8(*slot);
                out.put_u8(*sensor);
                out.put_u8(*enable as u8);
            }
            Command::ConnParamWrite { slot, params } => {
                out.put_u8(*slot);
                out.put_u16_le(fixed::to_conn_interval(params.min_interval_ms));
                out.put_u16_le(fixed::to_conn_interval(params.max_interval_ms));
                out.put_u16_le(params.latency);
                out.put_u16_le(fixed::to_conn_timeout(params.timeout_ms));
            }
            Command::DigitalIoWrite { slot, outputs } => {
                out.put_u8(*slot);
                for on in outputs {
                    out.put_u8(*on as u8);
                }
            }
        }
        out
    }
}
