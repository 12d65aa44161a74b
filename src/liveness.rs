//! Per-node liveness watchdog.
//!
//! Inbound traffic marks a node alive. Once per heartbeat the watchdog clears
//! that mark; a node still unmarked at the following heartbeat is declared
//! dead, its value sinks are zeroed and its status flips to disconnected.
//! Recovery happens on the next frame from that node.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::metrics;
use crate::nodes::Node;
use crate::protocol::{sensor, CONNECTED, DISCONNECTED, STATUS_CONNECTED, STATUS_DISCONNECTED};
use crate::registry::Registry;
use crate::sink::Readiness;

pub struct Watchdog {
    registry: Arc<Registry>,
}

impl Watchdog {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Record traffic from `slot`. Returns `true` if the node came back from
    /// the dead, in which case its status has already been restored.
    pub fn mark_alive(&self, slot: u8) -> bool {
        let Some(node) = self.registry.nodes().get(slot) else {
            return false;
        };
        let recovered = node.mark_alive();
        if recovered {
            metrics::inc_node_recoveries();
            info!("node {} recovered", slot);
            self.set_connected(slot, true);
        }
        recovered
    }

    /// Declare `slot` dead outside the heartbeat (the aggregator reported a
    /// disconnect). Nullifies only when this starts a new dead episode.
    pub fn mark_dead(&self, slot: u8) -> bool {
        let Some(node) = self.registry.nodes().get(slot) else {
            return false;
        };
        if node.mark_dead() {
            self.on_death(node);
            true
        } else {
            false
        }
    }

    /// One heartbeat over every active slot. Returns the slots that died.
    pub fn tick(&self) -> Vec<u8> {
        let mut died = Vec::new();
        for node in self.registry.nodes().iter().filter(|n| n.is_active()) {
            if !node.is_alive() && !node.is_dead() {
                if node.mark_dead() {
                    self.on_death(node);
                    died.push(node.slot());
                }
            } else {
                node.clear_alive();
            }
        }
        if !died.is_empty() {
            debug!("heartbeat: dead nodes {:?}", died);
        }
        died
    }

    fn on_death(&self, node: &Node) {
        metrics::inc_node_deaths();
        warn!("node {} stopped reporting", node.slot());
        self.nullify(node.slot());
        self.set_connected(node.slot(), false);
    }

    /// Zero every sink of `slot` except status and connection.
    pub fn nullify(&self, slot: u8) {
        let Some(id) = self.registry.external_id(slot) else {
            return;
        };
        for (sensor_id, sink) in self.registry.sinks_for(id) {
            if sensor_id == sensor::STATUS || sensor_id == sensor::CONNECTION {
                continue;
            }
            self.registry.bus().set(&sink, 0.0);
        }
    }

    /// Write the status text and connection flag for `slot`.
    pub fn set_connected(&self, slot: u8, connected: bool) {
        let Some(id) = self.registry.external_id(slot) else {
            return;
        };
        let (status, flag) = if connected {
            (STATUS_CONNECTED, CONNECTED)
        } else {
            (STATUS_DISCONNECTED, DISCONNECTED)
        };
        self.registry.deliver(id, sensor::STATUS, status.into());
        self.registry.deliver(id, sensor::CONNECTION, flag.into());
    }

    /// Ask the host to refresh every registered sink once.
    pub fn scan_all(&self) {
        let sinks = self.registry.all();
        debug!("initial scan of {} sinks", sinks.len());
        for sink in &sinks {
            self.registry.bus().scan(sink);
        }
    }

    /// Task body: wait for the host, scan once, then tick every `heartbeat`.
    pub async fn run(self: Arc<Self>, heartbeat: Duration, ready: Readiness) {
        ready.wait().await;
        self.scan_all();
        let mut interval = tokio::time::interval(heartbeat);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{IdentityIds, NodeTable};
    use crate::sink::{MemoryHost, SinkBus, SinkRef, SinkValue};

    fn setup() -> (Watchdog, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new());
        let bus = SinkBus::new(host.clone(), Readiness::new());
        let registry = Arc::new(Registry::new(
            Arc::new(NodeTable::new()),
            Arc::new(IdentityIds),
            bus,
        ));
        for (sensor_id, name) in [
            (sensor::STATUS, "n3:status"),
            (sensor::CONNECTION, "n3:conn"),
            (sensor::TEMPERATURE, "n3:temp"),
            (sensor::BUTTON, "n3:button"),
        ] {
            registry.register(3, sensor_id, SinkRef::new(name)).unwrap();
        }
        (Watchdog::new(registry), host)
    }

    #[test]
    fn silent_node_dies_once_and_is_nullified_once() {
        let (dog, host) = setup();
        dog.mark_alive(3);
        host.user_write("n3:button", 1.0);

        assert!(dog.tick().is_empty(), "alive node survives first tick");
        assert_eq!(dog.tick(), vec![3]);
        assert!(dog.tick().is_empty(), "already dead");

        assert_eq!(host.history("n3:temp"), vec![SinkValue::Number(0.0)]);
        assert_eq!(host.value("n3:button"), Some(SinkValue::Number(0.0)));
        assert_eq!(host.value("n3:status"), Some(SinkValue::from("DISCONNECTED")));
        assert_eq!(host.value("n3:conn"), Some(SinkValue::Number(0.0)));
    }

    #[test]
    fn traffic_between_ticks_keeps_node_alive() {
        let (dog, _) = setup();
        for _ in 0..5 {
            dog.mark_alive(3);
            assert!(dog.tick().is_empty());
        }
        assert!(!dog.registry().nodes().get(3).unwrap().is_dead());
    }

    #[test]
    fn recovery_restores_status() {
        let (dog, host) = setup();
        assert_eq!(dog.tick(), vec![3]);
        assert!(dog.mark_alive(3));
        assert!(!dog.mark_alive(3));
        assert_eq!(host.value("n3:status"), Some(SinkValue::from("CONNECTED")));
        assert_eq!(host.value("n3:conn"), Some(SinkValue::Number(1.0)));
    }

    #[test]
    fn disconnect_then_tick_does_not_nullify_twice() {
        let (dog, host) = setup();
        dog.mark_alive(3);
        assert!(dog.mark_dead(3));
        assert!(!dog.mark_dead(3));
        assert!(dog.tick().is_empty());
        assert_eq!(host.write_count("n3:temp"), 1);
    }

    #[test]
    fn inactive_slots_are_ignored() {
        let (dog, _) = setup();
        dog.tick();
        assert!(!dog.registry().nodes().get(4).unwrap().is_dead());
    }

    #[tokio::test]
    async fn run_waits_for_readiness_then_ticks_per_heartbeat() {
        tokio::time::pause();
        let (dog, host) = setup();
        let dog = Arc::new(dog);
        let ready = Readiness::new();
        let task = tokio::spawn(dog.clone().run(Duration::from_secs(90), ready.clone()));

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(host.scan_count("n3:temp"), 0, "nothing before readiness");

        ready.signal();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(host.scan_count("n3:temp"), 1);
        assert!(!dog.registry().nodes().get(3).unwrap().is_dead());

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(dog.registry().nodes().get(3).unwrap().is_dead());
        task.abort();
    }
}
