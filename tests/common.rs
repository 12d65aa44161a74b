//! Test utilities & fixtures.
//! Builds a full bridge over the in-process transport and memory host.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use thingy_bridge::bridge::Bridge;
use thingy_bridge::config::Config;
use thingy_bridge::protocol::opcode;
use thingy_bridge::sink::{MemoryHost, SinkRef};
use thingy_bridge::transport::MockTransport;

pub struct Rig {
    pub bridge: Bridge,
    pub host: Arc<MemoryHost>,
    pub transport: MockTransport,
}

impl Rig {
    pub fn register(&self, node: u8, sensor: u8, name: &str) {
        self.bridge
            .register(node, sensor, SinkRef::new(name))
            .expect("register sink");
    }
}

/// Defaults shortened so reconnects and composite writes finish quickly.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.timing.reconnect_delay_ms = 20;
    config.timing.refresh_delay_ms = 1;
    config.timing.confirm_delay_ms = 1;
    config.timing.teardown_timeout_ms = 1_000;
    config
}

pub fn rig_with(config: Config) -> Rig {
    let host = Arc::new(MemoryHost::new());
    let transport = MockTransport::new();
    let bridge = Bridge::new(&config, host.clone(), Arc::new(transport.clone()));
    Rig {
        bridge,
        host,
        transport,
    }
}

pub fn rig() -> Rig {
    rig_with(fast_config())
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub fn temperature(slot: u8, degrees: i8, hundredths: u8) -> Vec<u8> {
    vec![opcode::TEMPERATURE, 0, slot, degrees as u8, hundredths]
}

pub fn connect(slot: u8, name: &str) -> Vec<u8> {
    let mut frame = vec![opcode::CONNECT, 0, slot, 0, 0, 0, 0, 0, 0, 0, 0];
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);
    frame
}

pub fn disconnect(slot: u8) -> Vec<u8> {
    vec![opcode::DISCONNECT, 0, slot]
}
