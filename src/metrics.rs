//! Process-wide bridge counters.
//!
//! Plain relaxed atomics; read them together through [`snapshot`].
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAMES_UNKNOWN: AtomicU64 = AtomicU64::new(0);
static FRAMES_TRUNCATED: AtomicU64 = AtomicU64::new(0);
static NODE_DEATHS: AtomicU64 = AtomicU64::new(0);
static NODE_RECOVERIES: AtomicU64 = AtomicU64::new(0);
static CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static CONNECT_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMANDS_SENT: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_unknown() {
    FRAMES_UNKNOWN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_truncated() {
    FRAMES_TRUNCATED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_node_deaths() {
    NODE_DEATHS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_node_recoveries() {
    NODE_RECOVERIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connect_attempts() {
    CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connect_failures() {
    CONNECT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_sent() {
    COMMANDS_SENT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub frames_received: u64,
    pub frames_unknown: u64,
    pub frames_truncated: u64,
    pub node_deaths: u64,
    pub node_recoveries: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub commands_sent: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        frames_unknown: FRAMES_UNKNOWN.load(Ordering::Relaxed),
        frames_truncated: FRAMES_TRUNCATED.load(Ordering::Relaxed),
        node_deaths: NODE_DEATHS.load(Ordering::Relaxed),
        node_recoveries: NODE_RECOVERIES.load(Ordering::Relaxed),
        connect_attempts: CONNECT_ATTEMPTS.load(Ordering::Relaxed),
        connect_failures: CONNECT_FAILURES.load(Ordering::Relaxed),
        commands_sent: COMMANDS_SENT.load(Ordering::Relaxed),
    }
}
