//! Node arena and node-id strategies.
//!
//! Every slot the aggregator can report (`0..MAX_NODES` plus the aggregator's
//! own reserved id) has one [`Node`] record holding its liveness flags and an
//! optional custom id. Flags are independent atomics so the dispatch task
//! (sets alive) and the watchdog (clears alive, sets dead) never lose updates.
//!
//! [`NodeIdMap`] decides which id the outside world uses for a slot:
//! [`IdentityIds`] passes slot ids through, [`CustomIds`] remaps them to ids
//! taken from each node's advertised name.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::logutil::escape_log;
use crate::protocol::{custom_id_from_name, AGGREGATOR_ID, MAX_NODES};

const NO_CUSTOM_ID: u16 = u16::MAX;

#[derive(Debug)]
pub struct Node {
    slot: u8,
    active: AtomicBool,
    alive: AtomicBool,
    dead: AtomicBool,
    custom_id: AtomicU16,
}

impl Node {
    fn new(slot: u8) -> Self {
        Self {
            slot,
            active: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            custom_id: AtomicU16::new(NO_CUSTOM_ID),
        }
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn custom_id(&self) -> Option<u8> {
        match self.custom_id.load(Ordering::Acquire) {
            NO_CUSTOM_ID => None,
            id => Some(id as u8),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Record fresh traffic. Returns `true` when this ends a dead episode.
    pub fn mark_alive(&self) -> bool {
        self.alive.store(true, Ordering::Release);
        self.dead.swap(false, Ordering::AcqRel)
    }

    /// Clear the alive bit ahead of the next heartbeat.
    pub fn clear_alive(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Enter the dead state. Returns `true` only for the call that starts the
    /// episode, so side effects run once.
    pub fn mark_dead(&self) -> bool {
        self.alive.store(false, Ordering::Release);
        !self.dead.swap(true, Ordering::AcqRel)
    }

    fn set_custom_id(&self, id: Option<u8>) {
        let raw = id.map(u16::from).unwrap_or(NO_CUSTOM_ID);
        self.custom_id.store(raw, Ordering::Release);
    }
}

/// Fixed arena of node records indexed by slot id.
#[derive(Debug)]
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: (0..=AGGREGATOR_ID).map(Node::new).collect(),
        }
    }

    pub fn get(&self, slot: u8) -> Option<&Node> {
        self.nodes.get(slot as usize)
    }

    /// Managed slots: sensor nodes plus the aggregator.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| is_managed_id(n.slot))
    }

    pub fn aggregator(&self) -> &Node {
        &self.nodes[AGGREGATOR_ID as usize]
    }
}

/// Valid node ids: `0..MAX_NODES` and the aggregator's reserved id.
pub fn is_managed_id(id: u8) -> bool {
    id < MAX_NODES || id == AGGREGATOR_ID
}

/// Translation between slot ids and the ids sinks are registered under.
pub trait NodeIdMap: Send + Sync + 'static {
    /// Id the outside world knows `slot` by, if it currently has one.
    fn external_id(&self, slot: u8) -> Option<u8>;

    /// Slot currently answering to `external`.
    fn slot_for(&self, external: u8) -> Option<u8>;

    /// Bind `slot` using its advertised name. `Ok(Some(id))` when a custom id
    /// was assigned, `Ok(None)` when the strategy has nothing to bind.
    fn bind(&self, slot: u8, name: &str) -> Result<Option<u8>>;

    /// Drop any binding held by `slot`, returning the released id.
    fn release(&self, slot: u8) -> Option<u8>;
}

/// Slot ids are the external ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityIds;

impl NodeIdMap for IdentityIds {
    fn external_id(&self, slot: u8) -> Option<u8> {
        is_managed_id(slot).then_some(slot)
    }

    fn slot_for(&self, external: u8) -> Option<u8> {
        is_managed_id(external).then_some(external)
    }

    fn bind(&self, _slot: u8, _name: &str) -> Result<Option<u8>> {
        Ok(None)
    }

    fn release(&self, _slot: u8) -> Option<u8> {
        None
    }
}

/// Custom ids derived from advertised names (`<prefix><n>`), unique across
/// slots. The aggregator keeps its reserved id.
#[derive(Debug)]
pub struct CustomIds {
    nodes: Arc<NodeTable>,
    prefix: String,
    assign_lock: Mutex<()>,
}

impl CustomIds {
    pub fn new(nodes: Arc<NodeTable>, prefix: impl Into<String>) -> Self {
        Self {
            nodes,
            prefix: prefix.into(),
            assign_lock: Mutex::new(()),
        }
    }

    /// Linear scan for the slot owning `custom_id`.
    pub fn resolve_custom_id(&self, custom_id: u8) -> Option<u8> {
        self.nodes
            .iter()
            .find(|n| n.custom_id() == Some(custom_id))
            .map(Node::slot)
    }

    /// Give `slot` the id `custom_id` unless another slot already owns it.
    /// On rejection the slot is left without a custom id.
    pub fn assign(&self, slot: u8, custom_id: u8) -> Result<()> {
        let _guard = self.assign_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let node = self
            .nodes
            .get(slot)
            .filter(|n| is_managed_id(n.slot()))
            .ok_or(BridgeError::CapacityExceeded { node: slot as i32 })?;
        if !is_managed_id(custom_id) || custom_id == AGGREGATOR_ID {
            node.set_custom_id(None);
            return Err(BridgeError::CapacityExceeded {
                node: custom_id as i32,
            });
        }
        match self.resolve_custom_id(custom_id) {
            Some(owner) if owner != slot => {
                node.set_custom_id(None);
                Err(BridgeError::CustomIdCollision { custom_id, owner })
            }
            _ => {
                node.set_custom_id(Some(custom_id));
                Ok(())
            }
        }
    }
}

impl NodeIdMap for CustomIds {
    fn external_id(&self, slot: u8) -> Option<u8> {
        if slot == AGGREGATOR_ID {
            return Some(AGGREGATOR_ID);
        }
        self.nodes.get(slot).and_then(Node::custom_id)
    }

    fn slot_for(&self, external: u8) -> Option<u8> {
        if external == AGGREGATOR_ID {
            return Some(AGGREGATOR_ID);
        }
        self.resolve_custom_id(external)
    }

    fn bind(&self, slot: u8, name: &str) -> Result<Option<u8>> {
        let Some(custom_id) = custom_id_from_name(name, &self.prefix) else {
            debug!(
                "slot {} advertised '{}' without a custom id",
                slot,
                escape_log(name)
            );
            if let Some(node) = self.nodes.get(slot) {
                node.set_custom_id(None);
            }
            return Ok(None);
        };
        match self.assign(slot, custom_id) {
            Ok(()) => {
                info!("slot {} bound to custom id {}", slot, custom_id);
                Ok(Some(custom_id))
            }
            Err(e) => {
                warn!("slot {} not bound: {}", slot, e);
                Err(e)
            }
        }
    }

    fn release(&self, slot: u8) -> Option<u8> {
        let _guard = self.assign_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let node = self.nodes.get(slot)?;
        let released = node.custom_id();
        node.set_custom_id(None);
        released
    }
}
