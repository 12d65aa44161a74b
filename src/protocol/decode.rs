//! Inbound frame decoding.
//!
//! [`decode`] never fails: frames with an unknown opcode or a short payload
//! come back as [`Frame::Unknown`] / [`Frame::Truncated`] for the caller to log
//! and drop.

use super::fixed;
use super::{opcode, sensor, ConfigGroup, Frame, SensorReading};
use super::{MAX_NAME_LENGTH, RESP_CONNECT_NAME, RESP_ID, RESP_OPCODE};
use crate::sink::SinkValue;

/// Bounds-checked little-endian reads over a frame.
struct Payload<'a>(&'a [u8]);

impl<'a> Payload<'a> {
    fn u8(&self, at: usize) -> Option<u8> {
        self.0.get(at).copied()
    }

    fn i8(&self, at: usize) -> Option<i8> {
        self.u8(at).map(|b| b as i8)
    }

    fn u16(&self, at: usize) -> Option<u16> {
        let b = self.0.get(at..at + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&self, at: usize) -> Option<i16> {
        self.u16(at).map(|v| v as i16)
    }

    fn i32(&self, at: usize) -> Option<i32> {
        let b = self.0.get(at..at + 4)?;
        Some(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decode one notification frame.
pub fn decode(frame: &[u8]) -> Frame {
    let Some(&op) = frame.get(RESP_OPCODE) else {
        return Frame::Truncated {
            opcode: 0,
            node: None,
            len: 0,
        };
    };
    let node = frame.get(RESP_ID).copied();
    let p = Payload(frame);

    let decoded = node.and_then(|node| match op {
        opcode::CONNECT => Some(Frame::Connect {
            node,
            name: advertised_name(frame),
        }),
        opcode::DISCONNECT => Some(Frame::Disconnect { node }),
        opcode::BUTTON => readings(node, vec![num(sensor::BUTTON, p.u8(4)? as f64)]),
        opcode::BATTERY => readings(node, vec![num(sensor::BATTERY, p.u8(3)? as f64)]),
        opcode::RSSI => readings(node, vec![num(sensor::RSSI, p.i8(3)? as f64)]),
        opcode::TEMPERATURE => {
            let t = fixed::with_hundredths(p.i8(3)? as i32, p.u8(4)?);
            readings(node, vec![num(sensor::TEMPERATURE, t)])
        }
        opcode::PRESSURE => {
            let hpa = fixed::with_hundredths(p.i32(3)?, p.u8(7)?);
            readings(node, vec![num(sensor::PRESSURE, hpa)])
        }
        opcode::HUMIDITY => readings(node, vec![num(sensor::HUMIDITY, p.u8(3)? as f64)]),
        opcode::GAS => {
            let co2 = p.u16(3)?;
            let tvoc = p.u16(5)?;
            readings(
                node,
                vec![
                    num(sensor::CO2, co2 as f64),
                    num(sensor::TVOC, tvoc as f64),
                    SensorReading {
                        sensor: sensor::GAS,
                        value: SinkValue::Text(format!("{co2} eCO2 ppm\n{tvoc} TVOC ppb")),
                    },
                ],
            )
        }
        opcode::QUATERNIONS => {
            let mut out = Vec::with_capacity(4);
            for (i, id) in sensor::QUATERNION.iter().enumerate() {
                out.push(num(*id, fixed::q2_30(p.i32(3 + i * 4)?)));
            }
            readings(node, out)
        }
        opcode::RAW_MOTION => {
            let mut out = Vec::with_capacity(9);
            for (i, id) in sensor::RAW_MOTION.iter().enumerate() {
                let raw = p.i16(3 + i * 2)?;
                let value = match i {
                    0..=2 => fixed::accel(raw),
                    3..=5 => fixed::gyro(raw),
                    _ => fixed::compass(raw),
                };
                out.push(num(*id, value));
            }
            readings(node, out)
        }
        opcode::EULER => {
            let mut out = Vec::with_capacity(3);
            for (i, id) in sensor::EULER.iter().enumerate() {
                out.push(num(*id, fixed::q16_16(p.i32(3 + i * 4)?)));
            }
            readings(node, out)
        }
        opcode::HEADING => readings(node, vec![num(sensor::HEADING, fixed::q16_16(p.i32(3)?))]),
        opcode::ENV_CONFIG => config(
            node,
            ConfigGroup::Environment,
            vec![
                num(sensor::TEMP_INTERVAL, p.u16(3)? as f64),
                num(sensor::PRESSURE_INTERVAL, p.u16(5)? as f64),
                num(sensor::HUMID_INTERVAL, p.u16(7)? as f64),
                num(sensor::GAS_MODE, p.u8(9)? as f64),
            ],
        ),
        opcode::MOTION_CONFIG => config(
            node,
            ConfigGroup::Motion,
            vec![
                num(sensor::STEP_INTERVAL, p.u16(3)? as f64),
                num(sensor::TEMP_COMP_INTERVAL, p.u16(5)? as f64),
                num(sensor::MAG_COMP_INTERVAL, p.u16(7)? as f64),
                num(sensor::MOTION_FREQ, p.u16(9)? as f64),
                num(sensor::WAKE_ON_MOTION, p.u8(11)? as f64),
            ],
        ),
        opcode::CONN_PARAM => config(
            node,
            ConfigGroup::ConnParams,
            vec![
                num(sensor::CONN_MIN_INTERVAL, fixed::conn_interval_ms(p.u16(3)?)),
                num(sensor::CONN_MAX_INTERVAL, fixed::conn_interval_ms(p.u16(5)?)),
                num(sensor::CONN_LATENCY, p.u16(7)? as f64),
                num(sensor::CONN_TIMEOUT, fixed::conn_timeout_ms(p.u16(9)?)),
            ],
        ),
        opcode::DIGITAL_IO => {
            let mut out = Vec::with_capacity(4);
            for (i, id) in sensor::DIGITAL_OUT.iter().enumerate() {
                out.push(num(*id, p.u8(3 + i)? as f64));
            }
            config(node, ConfigGroup::DigitalIo, out)
        }
        _ => Some(Frame::Unknown {
            opcode: op,
            node: Some(node),
        }),
    });

    match decoded {
        Some(frame) => frame,
        None if node.is_none() && !is_known(op) => Frame::Unknown { opcode: op, node },
        None => Frame::Truncated {
            opcode: op,
            node,
            len: frame.len(),
        },
    }
}

fn is_known(op: u8) -> bool {
    matches!(op, 1..=4 | 6..=18)
}

fn num(sensor: u8, value: f64) -> SensorReading {
    SensorReading::number(sensor, value)
}

fn readings(node: u8, readings: Vec<SensorReading>) -> Option<Frame> {
    Some(Frame::Readings { node, readings })
}

fn config(node: u8, group: ConfigGroup, readings: Vec<SensorReading>) -> Option<Frame> {
    Some(Frame::Config {
        node,
        group,
        readings,
    })
}

/// Name bytes run from the name offset to the first NUL, the end of the frame,
/// or the maximum name length, whichever comes first.
fn advertised_name(frame: &[u8]) -> String {
    let Some(raw) = frame.get(RESP_CONNECT_NAME..) else {
        return String::new();
    };
    let raw = &raw[..raw.len().min(MAX_NAME_LENGTH)];
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
