//! Node/sensor registry: which sink receives values for `(node id, sensor id)`.
//!
//! Keys use the external node id, i.e. whatever the configured
//! [`NodeIdMap`](crate::nodes::NodeIdMap) hands out. Entries are added at
//! startup and never removed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::nodes::{is_managed_id, NodeIdMap, NodeTable};
use crate::protocol::{sensor, DISCONNECTED, STATUS_DISCONNECTED};
use crate::sink::{SinkBus, SinkRef, SinkValue};

pub struct Registry {
    entries: RwLock<HashMap<(u8, u8), SinkRef>>,
    nodes: Arc<NodeTable>,
    ids: Arc<dyn NodeIdMap>,
    bus: SinkBus,
}

impl Registry {
    pub fn new(nodes: Arc<NodeTable>, ids: Arc<dyn NodeIdMap>, bus: SinkBus) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            nodes,
            ids,
            bus,
        }
    }

    pub fn nodes(&self) -> &Arc<NodeTable> {
        &self.nodes
    }

    pub fn ids(&self) -> &Arc<dyn NodeIdMap> {
        &self.ids
    }

    pub fn bus(&self) -> &SinkBus {
        &self.bus
    }

    /// Bind `sink` to `(node_id, sensor_id)`.
    ///
    /// Status and connection sinks start out reporting a disconnected node
    /// until the first connect is observed.
    pub fn register(&self, node_id: u8, sensor_id: u8, sink: SinkRef) -> Result<()> {
        if !is_managed_id(node_id) {
            warn!(
                "rejecting sink '{}': node id {} out of range",
                sink, node_id
            );
            return Err(BridgeError::CapacityExceeded {
                node: node_id as i32,
            });
        }

        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((node_id, sensor_id), sink.clone());
        if let Some(old) = previous {
            warn!(
                "node {} sensor {}: sink '{}' replaced by '{}'",
                node_id, sensor_id, old, sink
            );
        }

        match sensor_id {
            sensor::STATUS => self.bus.set(&sink, STATUS_DISCONNECTED),
            sensor::CONNECTION => self.bus.set(&sink, DISCONNECTED),
            _ => {}
        }

        if let Some(node) = self.ids.slot_for(node_id).and_then(|s| self.nodes.get(s)) {
            node.set_active(true);
        }
        debug!("registered '{}' for node {} sensor {}", sink, node_id, sensor_id);
        Ok(())
    }

    /// Sink bound to `(node_id, sensor_id)`. Misses are routine (sensors the
    /// host chose not to expose) and only logged at debug level.
    pub fn lookup(&self, node_id: u8, sensor_id: u8) -> Option<SinkRef> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(node_id, sensor_id))
            .cloned();
        if found.is_none() {
            debug!("no sink for node {} sensor {}", node_id, sensor_id);
        }
        found
    }

    /// Every `(sensor id, sink)` registered for `node_id`, ordered by sensor id.
    pub fn sinks_for(&self, node_id: u8) -> Vec<(u8, SinkRef)> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(u8, SinkRef)> = guard
            .iter()
            .filter(|((node, _), _)| *node == node_id)
            .map(|((_, sensor), sink)| (*sensor, sink.clone()))
            .collect();
        out.sort_by_key(|(sensor, _)| *sensor);
        out
    }

    pub fn all(&self) -> Vec<SinkRef> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn has_node(&self, node_id: u8) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .any(|(node, _)| *node == node_id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot answering to a custom id, by linear scan of the node arena.
    pub fn resolve_custom_id(&self, custom_id: u8) -> Option<u8> {
        self.ids.slot_for(custom_id)
    }

    /// External id for `slot`; `None` while a custom-id slot is unbound.
    pub fn external_id(&self, slot: u8) -> Option<u8> {
        self.ids.external_id(slot)
    }

    /// Re-derive a slot's active flag from its current external id.
    pub fn refresh_active(&self, slot: u8) {
        if let Some(node) = self.nodes.get(slot) {
            let active = self
                .ids
                .external_id(slot)
                .map(|id| self.has_node(id))
                .unwrap_or(false);
            node.set_active(active);
        }
    }

    /// Write `value` to the sink bound to `(node_id, sensor_id)`, if any.
    pub fn deliver(&self, node_id: u8, sensor_id: u8, value: SinkValue) -> bool {
        match self.lookup(node_id, sensor_id) {
            Some(sink) => {
                self.bus.set(&sink, value);
                true
            }
            None => false,
        }
    }
}
