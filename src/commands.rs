//! Command sequencer: turns writes on command sinks into aggregator commands.
//!
//! Every operation is driven by a trigger sink. A zero or unset trigger is a
//! no-op; otherwise the command is issued and the trigger is reset to `0` so a
//! repeat needs a fresh write.
//!
//! Composite configuration writes gather each field from its sink's pending
//! value, send one write frame, wait for the node to apply it, and then ask for
//! the configuration back so the sinks show what the node actually accepted.
//! The waits are fixed delays, not acknowledgements: the aggregator has no
//! reply for a write.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::{sensor, Command, ConfigGroup, LedTarget, AGGREGATOR_ID};
use crate::registry::Registry;
use crate::sink::SinkRef;
use crate::supervisor::Supervisor;

/// Delays used by composite writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTiming {
    /// Between asking the host to refresh a field sink and reading it.
    pub refresh_delay: Duration,
    /// Between sending a write and reading the group back.
    pub confirm_delay: Duration,
}

impl Default for SequencerTiming {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_millis(100),
            confirm_delay: Duration::from_millis(500),
        }
    }
}

/// LED on/off state as last commanded, per external node id.
#[derive(Debug, Default)]
struct LedState {
    all: bool,
    nodes: [bool; AGGREGATOR_ID as usize + 1],
}

pub struct CommandSequencer {
    supervisor: Arc<Supervisor>,
    registry: Arc<Registry>,
    timing: SequencerTiming,
    leds: Mutex<LedState>,
}

impl CommandSequencer {
    pub fn new(supervisor: Arc<Supervisor>, registry: Arc<Registry>, timing: SequencerTiming) -> Self {
        Self {
            supervisor,
            registry,
            timing,
            leds: Mutex::new(LedState::default()),
        }
    }

    /// Resolve an external node id to the slot the aggregator addresses.
    fn slot(&self, node_id: u8) -> Result<u8> {
        self.registry
            .ids()
            .slot_for(node_id)
            .ok_or(BridgeError::UnknownNode(node_id))
    }

    async fn send(&self, cmd: &Command) -> Result<()> {
        debug!("sending {:?}", cmd);
        self.supervisor.send(&cmd.encode()).await
    }

    /// The trigger's pending value when it asks for action.
    fn armed(&self, trigger: &SinkRef) -> Option<f64> {
        self.registry
            .bus()
            .read_pending(trigger)
            .and_then(|v| v.as_number())
            .filter(|v| *v != 0.0)
    }

    fn reset(&self, trigger: &SinkRef) {
        self.registry.bus().set(trigger, 0.0);
    }

    /// Flip the LED of `node_id`, or of every node for the aggregator id.
    pub async fn toggle_led(&self, trigger: &SinkRef, node_id: u8) -> Result<bool> {
        if self.armed(trigger).is_none() {
            return Ok(false);
        }
        let outcome = self.toggle_led_inner(node_id).await;
        self.reset(trigger);
        outcome.map(|_| true)
    }

    async fn toggle_led_inner(&self, node_id: u8) -> Result<()> {
        let target = if node_id == AGGREGATOR_ID {
            LedTarget::All
        } else {
            LedTarget::Node(self.slot(node_id)?)
        };
        let on = {
            let mut leds = self.leds.lock().unwrap_or_else(PoisonError::into_inner);
            let state = match target {
                LedTarget::All => &mut leds.all,
                LedTarget::Node(_) => &mut leds.nodes[node_id as usize],
            };
            *state = !*state;
            *state
        };
        info!("LED {} for node {}", if on { "on" } else { "off" }, node_id);
        self.send(&Command::LedToggle { target, on }).await
    }

    /// Enable or disable a sensor on `node_id`. The sensor id is the trigger's
    /// value; the current state is read from that sensor's own sink.
    pub async fn toggle_sensor(&self, trigger: &SinkRef, node_id: u8) -> Result<bool> {
        let Some(raw) = self.armed(trigger) else {
            return Ok(false);
        };
        let outcome = match sensor_id(raw) {
            Some(sensor_id) => self.toggle_sensor_inner(node_id, sensor_id).await,
            None => {
                warn!("trigger value {} for node {} is not a sensor id", raw, node_id);
                Err(BridgeError::SinkNotFound {
                    node: node_id,
                    sensor: u8::MAX,
                })
            }
        };
        self.reset(trigger);
        outcome.map(|_| true)
    }

    async fn toggle_sensor_inner(&self, node_id: u8, sensor_id: u8) -> Result<()> {
        let sink = self
            .registry
            .lookup(node_id, sensor_id)
            .ok_or(BridgeError::SinkNotFound {
                node: node_id,
                sensor: sensor_id,
            })?;
        let slot = self.slot(node_id)?;
        let enabled = self
            .registry
            .bus()
            .read(&sink)
            .map(|v| v.is_truthy())
            .unwrap_or(false);

        self.send(&Command::SetSensor {
            slot,
            sensor: sensor_id,
            enable: !enabled,
        })
        .await?;
        info!(
            "node {} sensor {} {}",
            node_id,
            sensor_id,
            if enabled { "disabled" } else { "enabled" }
        );

        if sensor::is_toggle(sensor_id) && !enabled {
            self.registry.bus().set(&sink, 1.0);
        }
        if enabled {
            self.registry.bus().set(&sink, 0.0);
            for dependent in sensor::dependents(sensor_id) {
                self.registry.deliver(node_id, *dependent, 0.0.into());
            }
        }
        Ok(())
    }

    /// Ask `node_id` to report the configuration `group`.
    pub async fn read_config(
        &self,
        trigger: &SinkRef,
        node_id: u8,
        group: ConfigGroup,
    ) -> Result<bool> {
        if self.armed(trigger).is_none() {
            return Ok(false);
        }
        let outcome = match self.slot(node_id) {
            Ok(slot) => self.send(&group.read_command(slot)).await,
            Err(e) => Err(e),
        };
        self.reset(trigger);
        outcome.map(|_| true)
    }

    /// Write the configuration `group` of `node_id` from its field sinks, then
    /// read it back.
    pub async fn write_config(
        &self,
        trigger: &SinkRef,
        node_id: u8,
        group: ConfigGroup,
    ) -> Result<bool> {
        if self.armed(trigger).is_none() {
            return Ok(false);
        }
        let outcome = self.write_config_inner(node_id, group).await;
        if let Err(e) = &outcome {
            warn!("{} write for node {} aborted: {}", group.label(), node_id, e);
        }
        self.reset(trigger);
        outcome.map(|_| true)
    }

    async fn write_config_inner(&self, node_id: u8, group: ConfigGroup) -> Result<()> {
        let slot = self.slot(node_id)?;
        let mut values = Vec::with_capacity(group.sensors().len());
        for &sensor_id in group.sensors() {
            let sink = self
                .registry
                .lookup(node_id, sensor_id)
                .ok_or(BridgeError::SinkNotFound {
                    node: node_id,
                    sensor: sensor_id,
                })?;
            let bus = self.registry.bus();
            bus.scan(&sink);
            tokio::time::sleep(self.timing.refresh_delay).await;
            let value = bus
                .read_pending(&sink)
                .and_then(|v| v.as_number())
                .ok_or(BridgeError::MissingValue {
                    node: node_id,
                    sensor: sensor_id,
                })?;
            values.push(value);
        }

        let write = group
            .write_command(slot, &values)
            .ok_or(BridgeError::MissingValue {
                node: node_id,
                sensor: group.sensors().get(values.len()).copied().unwrap_or_default(),
            })?;
        self.send(&write).await?;
        info!("{} configuration written to node {}", group.label(), node_id);

        tokio::time::sleep(self.timing.confirm_delay).await;
        self.send(&group.read_command(slot)).await
    }
}

/// A trigger value names a sensor only when it is a whole number in `u8` range.
fn sensor_id(raw: f64) -> Option<u8> {
    if raw.fract() == 0.0 && (0.0..=u8::MAX as f64).contains(&raw) {
        Some(raw as u8)
    } else {
        None
    }
}
