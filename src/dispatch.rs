//! Applies inbound frames: liveness first, then sink delivery.

use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::liveness::Watchdog;
use crate::logutil::{escape_log, hex_snippet};
use crate::metrics;
use crate::nodes::is_managed_id;
use crate::protocol::{decode, Frame, SensorReading, AGGREGATOR_ID};
use crate::registry::Registry;

#[derive(Clone)]
pub struct Dispatcher {
    watchdog: Arc<Watchdog>,
}

impl Dispatcher {
    pub fn new(watchdog: Arc<Watchdog>) -> Self {
        Self { watchdog }
    }

    fn registry(&self) -> &Arc<Registry> {
        self.watchdog.registry()
    }

    /// Decode and apply one raw notification. Returns the decoded frame.
    pub fn handle(&self, raw: &[u8]) -> Frame {
        metrics::inc_frames_received();
        trace!("rx {}", hex_snippet(raw, 32));
        let frame = decode(raw);
        self.apply(&frame);
        frame
    }

    pub fn apply(&self, frame: &Frame) {
        // any traffic at all proves the aggregator is up
        self.watchdog.mark_alive(AGGREGATOR_ID);

        if let Some(node) = frame.node() {
            if !is_managed_id(node) {
                warn!("dropping frame from out-of-range node {}", node);
                return;
            }
        }

        match frame {
            Frame::Readings { node, readings } => {
                self.watchdog.mark_alive(*node);
                self.deliver(*node, readings);
            }
            Frame::Config {
                node,
                group,
                readings,
            } => {
                self.watchdog.mark_alive(*node);
                debug!("node {} reported {} configuration", node, group.label());
                self.deliver(*node, readings);
            }
            Frame::Connect { node, name } => self.on_connect(*node, name),
            Frame::Disconnect { node } => self.on_disconnect(*node),
            Frame::Unknown { node, .. } => {
                metrics::inc_frames_unknown();
                // still proof of life, whatever the opcode
                if let Some(node) = node {
                    self.watchdog.mark_alive(*node);
                }
                if let Some(e) = frame.error() {
                    debug!("ignoring frame from node {:?}: {}", node, e);
                }
            }
            Frame::Truncated { node, .. } => {
                metrics::inc_frames_truncated();
                if let Some(node) = node {
                    self.watchdog.mark_alive(*node);
                }
                if let Some(e) = frame.error() {
                    warn!("dropping frame from node {:?}: {}", node, e);
                }
            }
        }
    }

    fn deliver(&self, slot: u8, readings: &[SensorReading]) {
        let Some(id) = self.registry().external_id(slot) else {
            debug!("slot {} has no external id; {} readings dropped", slot, readings.len());
            return;
        };
        for reading in readings {
            self.registry()
                .deliver(id, reading.sensor, reading.value.clone());
        }
    }

    fn on_connect(&self, slot: u8, name: &str) {
        info!("node {} connected as '{}'", slot, escape_log(name));
        // a rejected custom id leaves the slot unbound; already logged
        let _ = self.registry().ids().bind(slot, name);
        self.registry().refresh_active(slot);
        if !self.watchdog.mark_alive(slot) {
            self.watchdog.set_connected(slot, true);
        }
    }

    fn on_disconnect(&self, slot: u8) {
        info!("node {} disconnected", slot);
        self.watchdog.mark_dead(slot);
        if let Some(released) = self.registry().ids().release(slot) {
            debug!("slot {} released custom id {}", slot, released);
            self.registry().refresh_active(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{CustomIds, IdentityIds, NodeTable};
    use crate::protocol::{opcode, sensor};
    use crate::sink::{MemoryHost, Readiness, SinkBus, SinkRef, SinkValue};

    fn dispatcher(custom: bool) -> (Dispatcher, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new());
        let bus = SinkBus::new(host.clone(), Readiness::new());
        let nodes = Arc::new(NodeTable::new());
        let ids: Arc<dyn crate::nodes::NodeIdMap> = if custom {
            Arc::new(CustomIds::new(nodes.clone(), "Node"))
        } else {
            Arc::new(IdentityIds)
        };
        let registry = Arc::new(Registry::new(nodes, ids, bus));
        (
            Dispatcher::new(Arc::new(Watchdog::new(registry))),
            host,
        )
    }

    fn connect_frame(slot: u8, name: &str) -> Vec<u8> {
        let mut f = vec![opcode::CONNECT, 0, slot, 0, 0, 0, 0, 0, 0, 0, 0];
        f.extend_from_slice(name.as_bytes());
        f
    }

    #[test]
    fn readings_reach_registered_sinks() {
        let (d, host) = dispatcher(false);
        d.registry()
            .register(3, sensor::TEMPERATURE, SinkRef::new("n3:temp"))
            .unwrap();
        d.handle(&[opcode::TEMPERATURE, 0, 3, 21, 50]);
        assert_eq!(host.value("n3:temp"), Some(SinkValue::Number(21.5)));
        assert!(d.registry().nodes().get(3).unwrap().is_alive());
        assert!(d.registry().nodes().aggregator().is_alive());
    }

    #[test]
    fn unknown_and_short_frames_are_dropped() {
        let (d, host) = dispatcher(false);
        d.registry()
            .register(3, sensor::PRESSURE, SinkRef::new("n3:p"))
            .unwrap();
        assert!(matches!(d.handle(&[0x63, 0, 3]), Frame::Unknown { .. }));
        assert!(matches!(
            d.handle(&[opcode::PRESSURE, 0, 3, 1]),
            Frame::Truncated { .. }
        ));
        assert_eq!(host.value("n3:p"), None);
    }

    #[test]
    fn connect_and_disconnect_drive_status() {
        let (d, host) = dispatcher(false);
        for (id, name) in [
            (sensor::STATUS, "n1:status"),
            (sensor::CONNECTION, "n1:conn"),
            (sensor::BATTERY, "n1:battery"),
        ] {
            d.registry().register(1, id, SinkRef::new(name)).unwrap();
        }
        d.handle(&connect_frame(1, "Thingy"));
        assert_eq!(host.value("n1:status"), Some(SinkValue::from("CONNECTED")));
        d.handle(&[opcode::BATTERY, 0, 1, 77]);

        d.handle(&[opcode::DISCONNECT, 0, 1]);
        assert_eq!(host.value("n1:status"), Some(SinkValue::from("DISCONNECTED")));
        assert_eq!(host.value("n1:conn"), Some(SinkValue::Number(0.0)));
        assert_eq!(host.value("n1:battery"), Some(SinkValue::Number(0.0)));

        // a repeated disconnect does not nullify again
        d.handle(&[opcode::DISCONNECT, 0, 1]);
        assert_eq!(host.write_count("n1:battery"), 2);
    }

    #[test]
    fn custom_ids_route_by_advertised_name() {
        let (d, host) = dispatcher(true);
        d.registry()
            .register(5, sensor::HUMIDITY, SinkRef::new("c5:humidity"))
            .unwrap();
        d.handle(&[opcode::HUMIDITY, 0, 2, 40]);
        assert_eq!(host.value("c5:humidity"), None, "slot 2 unbound so far");

        d.handle(&connect_frame(2, "Node5"));
        assert!(d.registry().nodes().get(2).unwrap().is_active());
        d.handle(&[opcode::HUMIDITY, 0, 2, 41]);
        assert_eq!(host.value("c5:humidity"), Some(SinkValue::Number(41.0)));

        d.handle(&[opcode::DISCONNECT, 0, 2]);
        assert_eq!(d.registry().resolve_custom_id(5), None);
        assert!(!d.registry().nodes().get(2).unwrap().is_active());
    }
}
