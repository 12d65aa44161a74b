//! Scriptable in-process transport.
//!
//! Counts connects, fails them on demand, records every written frame and
//! lets a test push notifications or cut the link as if the radio dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::sync::{mpsc, watch};

use super::{Connection, DisconnectHandler, Transport};
use crate::error::{BridgeError, Result};
use crate::protocol::{COMMAND_CHANNEL, NOTIFY_CHANNEL};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    connect_delay: Mutex<Duration>,
    failures: Mutex<VecDeque<String>>,
    drop_next: AtomicBool,
    current: Mutex<Option<Arc<MockConnection>>>,
    written: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Option<watch::Sender<usize>>,
}

#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0usize);
        Self {
            shared: Arc::new(Shared {
                subscriptions: Some(tx),
                ..Shared::default()
            }),
        }
    }

    /// Make each connect take `delay` before resolving.
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.shared.connect_delay) = delay;
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: usize, reason: &str) {
        let mut failures = lock(&self.shared.failures);
        failures.extend(std::iter::repeat(reason.to_string()).take(n));
    }

    /// Let the next successful connect lose its link before the caller has
    /// registered a disconnect handler.
    pub fn drop_next_connect(&self) {
        self.shared.drop_next.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Local `disconnect()` calls observed.
    pub fn disconnect_count(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<Arc<MockConnection>> {
        lock(&self.shared.current).clone()
    }

    /// Publish a notification frame on the live connection. Returns `false`
    /// when nobody is subscribed.
    pub fn inject(&self, frame: &[u8]) -> bool {
        self.inject_on(NOTIFY_CHANNEL, frame)
    }

    pub fn inject_on(&self, channel: &str, frame: &[u8]) -> bool {
        match self.current() {
            Some(conn) => conn.publish(channel, frame),
            None => false,
        }
    }

    /// Drop the link from the remote side: the connection closes and its
    /// disconnect handler fires.
    pub fn drop_link(&self) {
        if let Some(conn) = lock(&self.shared.current).take() {
            conn.close_remote();
        }
    }

    /// Frames written to the command channel, oldest first, across every
    /// connection.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.written_on(COMMAND_CHANNEL)
    }

    pub fn written_on(&self, channel: &str) -> Vec<Vec<u8>> {
        lock(&self.shared.written)
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn clear_written(&self) {
        lock(&self.shared.written).clear();
    }

    /// Resolve once at least `n` subscriptions have been made in total.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        if let Some(tx) = &self.shared.subscriptions {
            let mut rx = tx.subscribe();
            let _ = rx.wait_for(|count| *count >= n).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.shared.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = lock(&self.shared.failures).pop_front() {
            debug!("mock connect to {} failing: {}", address, reason);
            return Err(BridgeError::TransportConnect(reason));
        }
        let conn = Arc::new(MockConnection {
            shared: self.shared.clone(),
            subscribers: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        });
        if self.shared.drop_next.swap(false, Ordering::SeqCst) {
            debug!("mock link to {} lost right after connect", address);
            conn.close_remote();
        } else {
            *lock(&self.shared.current) = Some(conn.clone());
        }
        Ok(conn)
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<Bytes>>>,
    handler: Mutex<Option<DisconnectHandler>>,
    closed: AtomicBool,
    lost: AtomicBool,
}

impl MockConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        lock(&self.subscribers).contains_key(channel)
    }

    fn publish(&self, channel: &str, frame: &[u8]) -> bool {
        match lock(&self.subscribers).get(channel) {
            Some(tx) => tx.send(Bytes::copy_from_slice(frame)).is_ok(),
            None => false,
        }
    }

    fn close_remote(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lost.store(true, Ordering::SeqCst);
        lock(&self.subscribers).clear();
        let handler = lock(&self.handler).take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&self, channel: &str, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::NotConnected);
        }
        lock(&self.shared.written).push((channel.to_string(), frame.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        if self.is_closed() {
            return Err(BridgeError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).insert(channel.to_string(), tx);
        if let Some(count) = &self.shared.subscriptions {
            count.send_modify(|c| *c += 1);
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        lock(&self.subscribers).remove(channel);
        Ok(())
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        *lock(&self.handler) = Some(handler);
        if self.lost.load(Ordering::SeqCst) {
            let handler = lock(&self.handler).take();
            if let Some(handler) = handler {
                handler();
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.subscribers).clear();
        lock(&self.handler).take();
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
