//! Active VPN session table.
//!
//! One entry per framed IP, created by accounting `Start`, updated by
//! `Interim-Update`, removed by `Stop`. Counters are independent atomics;
//! readers take a snapshot with plain atomic loads and cross-field
//! consistency is explicitly not promised.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Per-session state keyed by framed IP.
#[derive(Debug, Default)]
pub struct VpnConnectionState {
    username: RwLock<String>,
    client_to_server_bytes: AtomicI64,
    server_to_client_bytes: AtomicI64,
    client_to_server_packets: AtomicI64,
    server_to_client_packets: AtomicI64,
}

impl VpnConnectionState {
    /// Fresh state with zeroed counters.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: RwLock::new(username.into()),
            ..Self::default()
        }
    }

    /// The session's user name.
    pub fn username(&self) -> String {
        self.username.read().clone()
    }

    /// Replace the user name (accounting corrects mismatches in place).
    pub fn set_username(&self, username: &str) {
        *self.username.write() = username.to_string();
    }

    /// Store all four counters.
    pub fn store_counters(
        &self,
        input_octets: i64,
        output_octets: i64,
        input_packets: i64,
        output_packets: i64,
    ) {
        self.client_to_server_bytes
            .store(input_octets, Ordering::Relaxed);
        self.server_to_client_bytes
            .store(output_octets, Ordering::Relaxed);
        self.client_to_server_packets
            .store(input_packets, Ordering::Relaxed);
        self.server_to_client_packets
            .store(output_packets, Ordering::Relaxed);
    }

    /// Read the four counters; each field independently.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            client_to_server_bytes: self.client_to_server_bytes.load(Ordering::Relaxed),
            server_to_client_bytes: self.server_to_client_bytes.load(Ordering::Relaxed),
            client_to_server_packets: self.client_to_server_packets.load(Ordering::Relaxed),
            server_to_client_packets: self.server_to_client_packets.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub client_to_server_bytes: i64,
    pub server_to_client_bytes: i64,
    pub client_to_server_packets: i64,
    pub server_to_client_packets: i64,
}

/// Concurrent map of active sessions.
#[derive(Debug, Default)]
pub struct SessionMap {
    entries: DashMap<String, Arc<VpnConnectionState>>,
}

impl SessionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session state for a framed IP.
    pub fn get(&self, framed_ip: &str) -> Option<Arc<VpnConnectionState>> {
        self.entries.get(framed_ip).map(|e| e.value().clone())
    }

    /// Create or replace the session for a framed IP.
    pub fn insert(&self, framed_ip: &str, state: Arc<VpnConnectionState>) {
        self.entries.insert(framed_ip.to_string(), state);
    }

    /// Remove and return the session for a framed IP.
    pub fn remove(&self, framed_ip: &str) -> Option<Arc<VpnConnectionState>> {
        self.entries.remove(framed_ip).map(|(_, state)| state)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
