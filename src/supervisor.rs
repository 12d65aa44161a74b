//! Connection supervisor.
//!
//! Owns the single aggregator connection and the three background tasks that
//! depend on it:
//!
//! * **dispatch**: subscribes to notifications on every connection as it is
//!   (re)established and applies frames in arrival order.
//! * **watchdog**: after host readiness, scans every sink once and then ticks
//!   the liveness watchdog once per heartbeat.
//! * **reconnect**: after host readiness, re-establishes a broken link every
//!   reconnect interval until it succeeds.
//!
//! Connects are single-flight: callers queued behind an attempt share its
//! outcome instead of starting their own. [`Supervisor::teardown`] stops the
//! reconnect task through a request/acknowledge rendezvous before the link is
//! closed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::liveness::Watchdog;
use crate::logutil::hex_snippet;
use crate::metrics;
use crate::protocol::{AGGREGATOR_ID, COMMAND_CHANNEL, NOTIFY_CHANNEL};
use crate::sink::Readiness;
use crate::transport::{Connection, Transport};

/// Where and how often the supervisor talks to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub address: String,
    pub notify_channel: String,
    pub command_channel: String,
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
    pub teardown_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7200".to_string(),
            notify_channel: NOTIFY_CHANNEL.to_string(),
            command_channel: COMMAND_CHANNEL.to_string(),
            heartbeat: Duration::from_millis(90_000),
            reconnect_delay: Duration::from_millis(3_000),
            teardown_timeout: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Outcome of the latest connect attempt, shared with queued callers.
#[derive(Default)]
struct ConnectGate {
    last_error: Option<BridgeError>,
}

/// A stop request carries the channel its acknowledgement goes back on.
type StopRequest = oneshot::Sender<()>;

struct Tasks {
    dispatch: JoinHandle<()>,
    watchdog: JoinHandle<()>,
    reconnect: JoinHandle<()>,
    stop_tx: mpsc::UnboundedSender<StopRequest>,
}

pub struct Supervisor {
    transport: Arc<dyn Transport>,
    settings: LinkSettings,
    watchdog: Arc<Watchdog>,
    dispatcher: Dispatcher,
    ready: Readiness,
    gate: tokio::sync::Mutex<ConnectGate>,
    attempts: AtomicU64,
    current: watch::Sender<Option<Arc<dyn Connection>>>,
    state: AtomicU8,
    broken: AtomicBool,
    shut_down: AtomicBool,
    tasks: Mutex<Option<Tasks>>,
    started: AtomicBool,
    me: Weak<Supervisor>,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: LinkSettings,
        watchdog: Arc<Watchdog>,
    ) -> Arc<Self> {
        let ready = watchdog.registry().bus().readiness().clone();
        let (current, _) = watch::channel(None);
        Arc::new_cyclic(|me| Self {
            transport,
            settings,
            dispatcher: Dispatcher::new(watchdog.clone()),
            watchdog,
            ready,
            gate: tokio::sync::Mutex::new(ConnectGate::default()),
            attempts: AtomicU64::new(0),
            current,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            broken: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(None),
            started: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Set by the transport's disconnect handler or a failed connect, cleared
    /// by a successful one.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Cached live connection, if any.
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.current.borrow().clone()
    }

    /// Return the live connection, connecting if there is none.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.connection() {
            return Ok(conn);
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::Teardown("bridge is shut down".to_string()));
        }

        let seen = self.attempts.load(Ordering::SeqCst);
        let mut gate = self.gate.lock().await;
        if let Some(conn) = self.connection() {
            return Ok(conn);
        }
        if self.attempts.load(Ordering::SeqCst) != seen {
            // an attempt finished while we queued; share its outcome
            if let Some(err) = gate.last_error.clone() {
                return Err(err);
            }
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::Teardown("bridge is shut down".to_string()));
        }

        let outcome = self.connect_once().await;
        gate.last_error = outcome.as_ref().err().cloned();
        self.attempts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn connect_once(&self) -> Result<Arc<dyn Connection>> {
        self.set_state(ConnectionState::Connecting);
        metrics::inc_connect_attempts();
        info!("connecting to aggregator at {}", self.settings.address);

        let conn = match self.transport.connect(&self.settings.address).await {
            Ok(conn) => conn,
            Err(e) => {
                metrics::inc_connect_failures();
                self.broken.store(true, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                warn!("connect failed: {}", e);
                return Err(e);
            }
        };

        self.current.send_replace(Some(conn.clone()));
        self.broken.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("connected to aggregator");
        if !self.watchdog.mark_alive(AGGREGATOR_ID) {
            self.watchdog.set_connected(AGGREGATOR_ID, true);
        }
        // registered last: a link already lost fires the handler right here
        let me = self.me.clone();
        conn.on_disconnect(Box::new(move || {
            if let Some(sup) = me.upgrade() {
                sup.on_unexpected_disconnect();
            }
        }));
        self.start_tasks();
        Ok(conn)
    }

    fn on_unexpected_disconnect(&self) {
        warn!("{}", BridgeError::UnexpectedDisconnect);
        self.broken.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        self.watchdog.set_connected(AGGREGATOR_ID, false);
    }

    /// Write one frame to the command channel.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        let conn = self.ensure_connected().await?;
        if self.is_broken() {
            return Err(BridgeError::UnexpectedDisconnect);
        }
        conn.write(&self.settings.command_channel, frame).await?;
        metrics::inc_commands_sent();
        trace!("tx {}", hex_snippet(frame, 32));
        Ok(())
    }

    fn start_tasks(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let tasks = Tasks {
            dispatch: tokio::spawn(me.clone().dispatch_loop()),
            watchdog: tokio::spawn(
                self.watchdog
                    .clone()
                    .run(self.settings.heartbeat, self.ready.clone()),
            ),
            reconnect: tokio::spawn(me.reconnect_loop(stop_rx)),
            stop_tx,
        };
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = Some(tasks);
        debug!("background tasks started");
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut conns = self.current.subscribe();
        loop {
            let conn = conns.borrow_and_update().clone();
            if let Some(conn) = conn {
                match conn.subscribe(&self.settings.notify_channel).await {
                    Ok(mut rx) => {
                        debug!("subscribed to notifications");
                        let replaced = loop {
                            tokio::select! {
                                biased;
                                frame = rx.recv() => match frame {
                                    Some(frame) => {
                                        self.dispatcher.handle(&frame);
                                    }
                                    None => break false,
                                },
                                changed = conns.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                    break true;
                                }
                            }
                        };
                        if replaced {
                            continue;
                        }
                        debug!("notification stream ended");
                    }
                    Err(e) => warn!("notification subscribe failed: {}", e),
                }
            }
            if conns.changed().await.is_err() {
                return;
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>, mut stop_rx: mpsc::UnboundedReceiver<StopRequest>) {
        tokio::select! {
            _ = self.ready.wait() => {}
            req = stop_rx.recv() => {
                if let Some(ack) = req {
                    let _ = ack.send(());
                }
                return;
            }
        }

        let mut interval = tokio::time::interval(self.settings.reconnect_delay);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                req = stop_rx.recv() => {
                    debug!("reconnect task stopping");
                    if let Some(ack) = req {
                        let _ = ack.send(());
                    }
                    break;
                }
                _ = interval.tick() => {
                    if !self.is_broken() {
                        continue;
                    }
                    info!("link broken; reconnecting");
                    self.current.send_replace(None);
                    match self.ensure_connected().await {
                        Ok(_) => info!("reconnected to aggregator"),
                        Err(e) => warn!("reconnect failed: {}", e),
                    }
                }
            }
        }
    }

    /// Stop the reconnect task (waiting for its acknowledgement), close the
    /// link, then stop the remaining tasks. The link is closed even when the
    /// acknowledgement times out; the timeout is still reported.
    pub async fn teardown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut outcome = Ok(());
        if let Some(tasks) = &tasks {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tasks.stop_tx.send(ack_tx).is_ok() {
                match tokio::time::timeout(self.settings.teardown_timeout, ack_rx).await {
                    Ok(Ok(())) => debug!("reconnect task acknowledged stop"),
                    Ok(Err(_)) => warn!("reconnect task ended without acknowledging"),
                    Err(_) => {
                        error!(
                            "reconnect task did not stop within {:?}",
                            self.settings.teardown_timeout
                        );
                        outcome = Err(BridgeError::Teardown(
                            "reconnect task did not acknowledge stop".to_string(),
                        ));
                    }
                }
            }
            tasks.reconnect.abort();
        }

        {
            let _gate = self.gate.lock().await;
            if let Some(conn) = self.current.send_replace(None) {
                if let Err(e) = conn.unsubscribe(&self.settings.notify_channel).await {
                    warn!("unsubscribe failed: {}", e);
                }
                if let Err(e) = conn.disconnect().await {
                    warn!("disconnect failed: {}", e);
                }
            }
            self.set_state(ConnectionState::Disconnected);
        }

        if let Some(tasks) = tasks {
            tasks.dispatch.abort();
            tasks.watchdog.abort();
        }
        info!("bridge torn down");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{IdentityIds, NodeTable};
    use crate::registry::Registry;
    use crate::sink::{MemoryHost, SinkBus, SinkRef, SinkValue};
    use crate::transport::MockTransport;
    use crate::protocol::sensor;

    fn supervisor(transport: &MockTransport) -> (Arc<Supervisor>, Arc<MemoryHost>, Readiness) {
        let host = Arc::new(MemoryHost::new());
        let ready = Readiness::new();
        let bus = SinkBus::new(host.clone(), ready.clone());
        let registry = Arc::new(Registry::new(
            Arc::new(NodeTable::new()),
            Arc::new(IdentityIds),
            bus,
        ));
        registry
            .register(AGGREGATOR_ID, sensor::STATUS, SinkRef::new("agg:status"))
            .unwrap();
        let watchdog = Arc::new(Watchdog::new(registry));
        let settings = LinkSettings {
            reconnect_delay: Duration::from_millis(20),
            teardown_timeout: Duration::from_secs(1),
            ..LinkSettings::default()
        };
        (
            Supervisor::new(Arc::new(transport.clone()), settings, watchdog),
            host,
            ready,
        )
    }

    #[tokio::test]
    async fn connect_is_cached() {
        let t = MockTransport::new();
        let (sup, host, _) = supervisor(&t);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        sup.ensure_connected().await.unwrap();
        sup.ensure_connected().await.unwrap();
        assert_eq!(t.connect_count(), 1);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(host.value("agg:status"), Some(SinkValue::from("CONNECTED")));
        sup.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn send_writes_to_command_channel() {
        let t = MockTransport::new();
        let (sup, _, _) = supervisor(&t);
        sup.send(&[6, 3]).await.unwrap();
        assert_eq!(t.commands(), vec![vec![6, 3]]);
        sup.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_drop_marks_broken_and_aggregator_disconnected() {
        let t = MockTransport::new();
        let (sup, host, _) = supervisor(&t);
        sup.ensure_connected().await.unwrap();
        t.drop_link();
        assert!(sup.is_broken());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(host.value("agg:status"), Some(SinkValue::from("DISCONNECTED")));
        assert_eq!(sup.send(&[6, 1]).await, Err(BridgeError::UnexpectedDisconnect));
        sup.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_closes_link_and_refuses_new_connects() {
        let t = MockTransport::new();
        let (sup, _, ready) = supervisor(&t);
        ready.signal();
        sup.ensure_connected().await.unwrap();
        sup.teardown().await.unwrap();
        assert_eq!(t.disconnect_count(), 1);
        assert!(sup.connection().is_none());
        assert!(matches!(
            sup.ensure_connected().await,
            Err(BridgeError::Teardown(_))
        ));
        assert_eq!(t.connect_count(), 1);
    }
}
