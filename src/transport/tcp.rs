//! SLIP-over-TCP link to a BLE relay.
//!
//! The relay owns the actual BLE central and forwards the aggregator's
//! notifications as SLIP frames. Outbound frames are prefixed with a one-byte
//! channel tag so the relay knows which characteristic to write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::slip::{slip_encode, SlipDecoder};
use super::{Connection, DisconnectHandler, Transport};
use crate::error::{BridgeError, Result};
use crate::logutil::hex_snippet;

/// Channel tag for command-channel writes.
pub const TAG_COMMAND: u8 = 0x02;
/// Channel tag for notification-channel traffic.
pub const TAG_NOTIFY: u8 = 0x03;

pub struct TcpTransport {
    notify_channel: String,
    command_channel: String,
}

impl TcpTransport {
    pub fn new(notify_channel: impl Into<String>, command_channel: impl Into<String>) -> Self {
        Self {
            notify_channel: notify_channel.into(),
            command_channel: command_channel.into(),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| BridgeError::TransportConnect(format!("{}: {}", address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }
        info!("connected to relay at {}", address);
        let (mut reader, writer) = stream.into_split();

        let conn = Arc::new(TcpConnection {
            notify_channel: self.notify_channel.clone(),
            command_channel: self.command_channel.clone(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            subscriber: Mutex::new(None),
            handler: Mutex::new(None),
            closing: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let weak = Arc::downgrade(&conn);
        let task = tokio::spawn(async move {
            let mut decoder = SlipDecoder::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("relay read error: {}", e);
                        break;
                    }
                };
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                trace!("relay rx {} bytes: {}", n, hex_snippet(&buf[..n], 64));
                for frame in decoder.push(&buf[..n]) {
                    conn.publish(frame);
                }
            }
            if let Some(conn) = weak.upgrade() {
                conn.on_link_lost();
            }
        });
        *conn
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(conn)
    }
}

struct TcpConnection {
    notify_channel: String,
    command_channel: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    handler: Mutex<Option<DisconnectHandler>>,
    closing: AtomicBool,
    /// Set once the reader sees the socket close; a handler registered
    /// afterwards fires immediately.
    lost: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TcpConnection {
    fn tag(&self, channel: &str) -> Result<u8> {
        if channel == self.command_channel {
            Ok(TAG_COMMAND)
        } else if channel == self.notify_channel {
            Ok(TAG_NOTIFY)
        } else {
            Err(BridgeError::Transport(format!("unknown channel {}", channel)))
        }
    }

    fn publish(&self, frame: Vec<u8>) {
        let guard = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(Bytes::from(frame)) {
                    trace!("subscriber gone; dropping {} byte frame", e.0.len());
                }
            }
            None => trace!("no subscriber; dropping {} byte frame", frame.len()),
        }
    }

    fn on_link_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        warn!("relay link lost");
        self.fire_handler();
    }

    /// Runs the handler at most once, whichever of link loss and
    /// registration comes last.
    fn fire_handler(&self) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write(&self, channel: &str, frame: &[u8]) -> Result<()> {
        let tag = self.tag(channel)?;
        if self.lost.load(Ordering::SeqCst) {
            return Err(BridgeError::UnexpectedDisconnect);
        }
        let mut payload = Vec::with_capacity(frame.len() + 1);
        payload.push(tag);
        payload.extend_from_slice(frame);
        let wire = slip_encode(&payload);

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        writer
            .write_all(&wire)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        trace!("relay tx {}", hex_snippet(&wire, 64));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        if self.tag(channel)? != TAG_NOTIFY {
            return Err(BridgeError::Transport(format!(
                "channel {} does not notify",
                channel
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.tag(channel)?;
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        if self.lost.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst) {
            debug!("relay link already lost; firing disconnect handler now");
            self.fire_handler();
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{COMMAND_CHANNEL, NOTIFY_CHANNEL};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_flow_both_ways_over_slip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);

        let (conn, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        let conn = conn.unwrap();
        let (mut relay, _) = accepted.unwrap();

        let mut rx = conn.subscribe(NOTIFY_CHANNEL).await.unwrap();
        relay
            .write_all(&slip_encode(&[7, 0, 3, 21, 50]))
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_ref(), &[7, 0, 3, 21, 50]);

        conn.write(COMMAND_CHANNEL, &[6, 3]).await.unwrap();
        let mut buf = [0u8; 5];
        relay.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xC0, TAG_COMMAND, 6, 3, 0xC0]);
    }

    #[tokio::test]
    async fn frames_for_a_dropped_subscriber_are_discarded_quietly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);
        let (conn, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        let conn = conn.unwrap();
        let (mut relay, _) = accepted.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        conn.on_disconnect(Box::new(move || f.store(true, Ordering::SeqCst)));

        drop(conn.subscribe(NOTIFY_CHANNEL).await.unwrap());
        relay.write_all(&slip_encode(&[9, 0, 4, 40])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the reader survives and serves the next subscriber
        let mut rx = conn.subscribe(NOTIFY_CHANNEL).await.unwrap();
        relay.write_all(&slip_encode(&[9, 0, 4, 41])).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_ref(), &[9, 0, 4, 41]);
        assert!(!fired.load(Ordering::SeqCst));
        conn.write(COMMAND_CHANNEL, &[6, 4]).await.unwrap();
    }

    #[tokio::test]
    async fn remote_close_fires_disconnect_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);
        let (conn, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        let conn = conn.unwrap();
        let (relay, _) = accepted.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        conn.on_disconnect(Box::new(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }));
        drop(relay);
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handler_registered_after_close_still_fires() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);
        let (conn, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        let conn = conn.unwrap();
        let (relay, _) = accepted.unwrap();

        drop(relay);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        conn.on_disconnect(Box::new(move || f.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(
            conn.write(COMMAND_CHANNEL, &[6, 3]).await,
            Err(BridgeError::UnexpectedDisconnect)
        );
    }

    #[tokio::test]
    async fn local_disconnect_does_not_fire_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);
        let (conn, accepted) = tokio::join!(transport.connect(&addr), listener.accept());
        let conn = conn.unwrap();
        let _relay = accepted.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        conn.on_disconnect(Box::new(move || f.store(true, Ordering::SeqCst)));
        conn.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let transport = TcpTransport::new(NOTIFY_CHANNEL, COMMAND_CHANNEL);
        assert!(matches!(
            transport.connect(&addr).await,
            Err(BridgeError::TransportConnect(_))
        ));
    }
}
