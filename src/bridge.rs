//! Wiring: one [`Bridge`] owns every component for a single aggregator.

use std::sync::Arc;

use log::{info, warn};

use crate::commands::CommandSequencer;
use crate::config::{Config, SinkConfig};
use crate::error::Result;
use crate::liveness::Watchdog;
use crate::nodes::{CustomIds, IdentityIds, NodeIdMap, NodeTable};
use crate::registry::Registry;
use crate::sink::{Readiness, SinkBus, SinkHost, SinkRef};
use crate::supervisor::Supervisor;
use crate::transport::{Connection, Transport};

pub struct Bridge {
    registry: Arc<Registry>,
    watchdog: Arc<Watchdog>,
    supervisor: Arc<Supervisor>,
    commands: CommandSequencer,
    ready: Readiness,
}

impl Bridge {
    pub fn new(config: &Config, host: Arc<dyn SinkHost>, transport: Arc<dyn Transport>) -> Self {
        let ready = Readiness::new();
        let nodes = Arc::new(NodeTable::new());
        let ids: Arc<dyn NodeIdMap> = if config.nodes.custom_ids {
            info!(
                "custom node ids enabled (prefix '{}')",
                config.nodes.custom_name_prefix
            );
            Arc::new(CustomIds::new(
                nodes.clone(),
                config.nodes.custom_name_prefix.clone(),
            ))
        } else {
            Arc::new(IdentityIds)
        };
        let registry = Arc::new(Registry::new(
            nodes,
            ids,
            SinkBus::new(host, ready.clone()),
        ));
        let watchdog = Arc::new(Watchdog::new(registry.clone()));
        let supervisor = Supervisor::new(transport, config.link_settings(), watchdog.clone());
        let commands = CommandSequencer::new(
            supervisor.clone(),
            registry.clone(),
            config.sequencer_timing(),
        );
        Self {
            registry,
            watchdog,
            supervisor,
            commands,
            ready,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn commands(&self) -> &CommandSequencer {
        &self.commands
    }

    pub fn readiness(&self) -> &Readiness {
        &self.ready
    }

    pub fn register(&self, node_id: u8, sensor_id: u8, sink: SinkRef) -> Result<()> {
        self.registry.register(node_id, sensor_id, sink)
    }

    /// Register every declared sink, skipping (and logging) rejected ones.
    /// Returns how many were accepted.
    pub fn register_all(&self, sinks: &[SinkConfig]) -> usize {
        sinks
            .iter()
            .filter(|s| {
                match self.register(s.node, s.sensor, SinkRef::new(s.name.as_str())) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("skipping sink '{}': {}", s.name, e);
                        false
                    }
                }
            })
            .count()
    }

    /// First connect; also launches the background tasks.
    pub async fn start(&self) -> Result<Arc<dyn Connection>> {
        self.supervisor.ensure_connected().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.teardown().await
    }
}
