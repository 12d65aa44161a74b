//! # Sink Host Interface
//!
//! Sinks are externally owned storage locations holding one sensor's current
//! value. The bridge only writes them, asks the host to refresh them, and reads
//! back values users have written to configuration sinks.
//!
//! - [`SinkHost`] is the seam to the host framework.
//! - [`Readiness`] is the one-shot "host finished starting" signal.
//! - [`SinkBus`] couples the two: writes always land, host refreshes only once
//!   the host is ready.
//! - [`MemoryHost`] is an in-process host used by the daemon and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Opaque handle to one host sink. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkRef(Arc<str>);

impl SinkRef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value carried by a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SinkValue {
    Number(f64),
    Text(String),
}

impl SinkValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SinkValue::Number(n) => Some(*n),
            SinkValue::Text(_) => None,
        }
    }

    /// Non-zero numbers are "on"; text is never on.
    pub fn is_truthy(&self) -> bool {
        self.as_number().map(|n| n != 0.0).unwrap_or(false)
    }
}

impl From<f64> for SinkValue {
    fn from(v: f64) -> Self {
        SinkValue::Number(v)
    }
}

impl From<&str> for SinkValue {
    fn from(v: &str) -> Self {
        SinkValue::Text(v.to_string())
    }
}

impl fmt::Display for SinkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkValue::Number(n) => write!(f, "{n}"),
            SinkValue::Text(t) => f.write_str(t),
        }
    }
}

/// The host framework that owns every sink.
///
/// Implementations must be internally thread-safe: the dispatch, watchdog and
/// command paths all call in concurrently.
pub trait SinkHost: Send + Sync + 'static {
    /// Store a new value.
    fn write(&self, sink: &SinkRef, value: SinkValue);

    /// Ask the host to process/publish the sink's current value.
    fn scan(&self, sink: &SinkRef);

    /// Current value, if the sink holds one.
    fn read(&self, sink: &SinkRef) -> Option<SinkValue>;

    /// Most recent user-written value that the bridge has not yet confirmed.
    /// `None` means the sink is unset.
    fn read_pending(&self, sink: &SinkRef) -> Option<SinkValue>;
}

/// One-shot readiness flag set by the host after its own startup.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the host has signaled.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Host handle plus readiness, shared by every component that writes sinks.
#[derive(Clone)]
pub struct SinkBus {
    host: Arc<dyn SinkHost>,
    ready: Readiness,
}

impl SinkBus {
    pub fn new(host: Arc<dyn SinkHost>, ready: Readiness) -> Self {
        Self { host, ready }
    }

    pub fn host(&self) -> &Arc<dyn SinkHost> {
        &self.host
    }

    pub fn readiness(&self) -> &Readiness {
        &self.ready
    }

    /// Write a value; the host is asked to refresh only once it is ready.
    pub fn set(&self, sink: &SinkRef, value: impl Into<SinkValue>) {
        self.host.write(sink, value.into());
        if self.ready.is_ready() {
            self.host.scan(sink);
        }
    }

    pub fn scan(&self, sink: &SinkRef) {
        self.host.scan(sink);
    }

    pub fn read(&self, sink: &SinkRef) -> Option<SinkValue> {
        self.host.read(sink)
    }

    pub fn read_pending(&self, sink: &SinkRef) -> Option<SinkValue> {
        self.host.read_pending(sink)
    }
}

#[derive(Debug, Default, Clone)]
struct SinkState {
    value: Option<SinkValue>,
    pending: Option<SinkValue>,
    history: Vec<SinkValue>,
    scans: u64,
}

/// In-process [`SinkHost`] keeping every value in memory.
///
/// Values written by the bridge are recorded in a per-sink history, so tests
/// can assert on exactly what was written and how often.
#[derive(Debug, Default)]
pub struct MemoryHost {
    sinks: Mutex<HashMap<String, SinkState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, sink: &str, f: impl FnOnce(&mut SinkState) -> R) -> R {
        let mut guard = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.entry(sink.to_string()).or_default())
    }

    /// Simulate a user writing to a configuration/command sink.
    pub fn user_write(&self, sink: &str, value: impl Into<SinkValue>) {
        self.with(sink, |s| s.pending = Some(value.into()));
    }

    pub fn value(&self, sink: &str) -> Option<SinkValue> {
        self.with(sink, |s| s.value.clone())
    }

    /// Every value the bridge wrote to `sink`, oldest first.
    pub fn history(&self, sink: &str) -> Vec<SinkValue> {
        self.with(sink, |s| s.history.clone())
    }

    pub fn write_count(&self, sink: &str) -> usize {
        self.with(sink, |s| s.history.len())
    }

    pub fn scan_count(&self, sink: &str) -> u64 {
        self.with(sink, |s| s.scans)
    }

    /// Current value of every sink that holds one, keyed by sink name.
    pub fn snapshot(&self) -> HashMap<String, SinkValue> {
        let guard = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter_map(|(k, s)| s.value.clone().map(|v| (k.clone(), v)))
            .collect()
    }
}

impl SinkHost for MemoryHost {
    fn write(&self, sink: &SinkRef, value: SinkValue) {
        self.with(sink.name(), |s| {
            s.history.push(value.clone());
            s.value = Some(value);
            s.pending = None;
        });
    }

    fn scan(&self, sink: &SinkRef) {
        self.with(sink.name(), |s| s.scans += 1);
    }

    fn read(&self, sink: &SinkRef) -> Option<SinkValue> {
        self.with(sink.name(), |s| s.value.clone())
    }

    fn read_pending(&self, sink: &SinkRef) -> Option<SinkValue> {
        self.with(sink.name(), |s| s.pending.clone().or_else(|| s.value.clone()))
    }
}
