//! Session tracker worker.
//!
//! Consumes the kernel connection-tracking feed, correlates flows with
//! the active-session table, and emits one structured record per
//! finished flow. The feed itself is a capability: the worker only sees
//! a stream of [`FlowEvent`]s and reconnects with 1-second backoff when
//! it drops.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;

use swanportal_adapters::LogSink;

use crate::state::AppState;
use crate::supervisor::WorkerHandle;

/// Log channel for finished flows.
const LOG_CHANNEL: &str = "NetFilterConnectionTracking";

/// Feed failure.
#[derive(Debug, thiserror::Error)]
#[error("conntrack feed: {0}")]
pub struct FeedError(pub String);

/// Flow event kinds the tracker consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEventKind {
    New,
    Destroy,
}

/// One connection-tracking event.
#[derive(Debug, Clone)]
pub struct FlowEvent {
    pub kind: FlowEventKind,
    pub id: u32,
    pub confirmed: bool,
    pub nat: bool,
    pub proto: u8,
    pub orig_src_addr: IpAddr,
    pub orig_src_port: u16,
    pub orig_dst_addr: IpAddr,
    pub orig_dst_port: u16,
    pub reply_src_addr: IpAddr,
    pub reply_src_port: u16,
    pub reply_dst_addr: IpAddr,
    pub reply_dst_port: u16,
}

/// An open subscription to flow events.
#[async_trait]
pub trait ConntrackEvents: Send {
    /// Wait for the next event.
    async fn next(&mut self) -> Result<FlowEvent, FeedError>;
}

/// The kernel connection-tracking capability.
#[async_trait]
pub trait ConntrackFeed: Send + Sync {
    /// Open a subscription.
    async fn connect(&self) -> Result<Box<dyn ConntrackEvents>, FeedError>;
}

/// Feed for platforms without a conntrack subscription: connects and then
/// idles. The session table is still maintained by accounting; only the
/// per-flow audit records are absent.
#[derive(Debug, Default)]
pub struct IdleConntrackFeed;

struct IdleEvents;

#[async_trait]
impl ConntrackEvents for IdleEvents {
    async fn next(&mut self) -> Result<FlowEvent, FeedError> {
        std::future::pending().await
    }
}

#[async_trait]
impl ConntrackFeed for IdleConntrackFeed {
    async fn connect(&self) -> Result<Box<dyn ConntrackEvents>, FeedError> {
        Ok(Box::new(IdleEvents))
    }
}

/// One tracked flow, emitted on destroy.
#[derive(Debug, Clone, Serialize)]
struct ConnectionEntry {
    username: String,
    since: i64,
    until: i64,
    proto: String,
    src_addr: String,
    src_port: u16,
    dst_addr: String,
    dst_port: u16,
}

fn proto_name(proto: u8) -> &'static str {
    match proto {
        1 => "ICMP",
        6 => "TCP",
        17 => "UDP",
        _ => "?",
    }
}

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Whether a flow looks like VPN client traffic worth recording.
fn wants_flow(event: &FlowEvent) -> bool {
    if !event.confirmed || !event.nat {
        return false;
    }
    // Weird tuples where neither direction mirrors the other.
    if event.orig_dst_addr != event.reply_src_addr && event.orig_src_addr != event.reply_dst_addr {
        return false;
    }
    if event.orig_dst_port != event.reply_src_port && event.orig_src_port != event.reply_dst_port {
        return false;
    }
    if event.proto != 6 && event.proto != 17 {
        return false;
    }
    // Local DNS chatter.
    if event.proto == 17 && event.orig_dst_port == 53 && is_private(event.orig_dst_addr) {
        return false;
    }
    is_private(event.orig_src_addr)
}

/// Run the session tracker worker until shutdown.
pub async fn run(app: Arc<AppState>, worker: WorkerHandle, feed: Arc<dyn ConntrackFeed>) {
    let log = app.log.clone();
    let mut flows: HashMap<u32, ConnectionEntry> = HashMap::new();

    // The session table this worker owns is ready as soon as it runs;
    // the feed subscription below is an observer that may come and go.
    log.debug("Connection tracking initialization completed", &[]);
    worker.report_init_completed();

    loop {
        let mut events = match feed.connect().await {
            Ok(events) => events,
            Err(e) => {
                log.error(
                    "Failed to initialize connection tracking",
                    &[("err", &e.to_string())],
                );
                tokio::select! {
                    _ = worker.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                }
            }
        };

        loop {
            tokio::select! {
                _ = worker.cancelled() => {
                    log.debug("Terminating connection tracking...", &[]);
                    log.debug("Connection tracking termination completed", &[]);
                    worker.report_quit_completed();
                    return;
                }
                result = events.next() => match result {
                    Ok(event) => handle_event(&app, &log, &mut flows, event),
                    Err(e) => {
                        log.error("Connection tracking error", &[("err", &e.to_string())]);
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = worker.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }

    worker.report_quit_completed();
}

fn handle_event(
    app: &AppState,
    log: &Arc<dyn LogSink>,
    flows: &mut HashMap<u32, ConnectionEntry>,
    event: FlowEvent,
) {
    if !wants_flow(&event) {
        return;
    }

    match event.kind {
        FlowEventKind::New => {
            let src_addr = event.orig_src_addr.to_string();
            let username = app
                .sessions
                .get(&src_addr)
                .map(|state| state.username())
                .unwrap_or_else(|| "?".to_string());

            let entry = ConnectionEntry {
                username,
                since: unix_now(),
                until: 0,
                proto: proto_name(event.proto).to_string(),
                src_addr,
                src_port: event.orig_src_port,
                dst_addr: event.orig_dst_addr.to_string(),
                dst_port: event.orig_dst_port,
            };

            log.debug(
                "NetFilter create connection",
                &[
                    ("id", &event.id.to_string()),
                    ("username", &entry.username),
                    ("srcAddr", &entry.src_addr),
                    ("dstAddr", &entry.dst_addr),
                ],
            );
            flows.insert(event.id, entry);
        }
        FlowEventKind::Destroy => {
            let entry = match flows.remove(&event.id) {
                Some(mut entry) => {
                    entry.until = unix_now();
                    entry
                }
                // Destroy without a matching create still gets recorded.
                None => ConnectionEntry {
                    username: "?".to_string(),
                    since: 0,
                    until: unix_now(),
                    proto: proto_name(event.proto).to_string(),
                    src_addr: event.orig_src_addr.to_string(),
                    src_port: event.orig_src_port,
                    dst_addr: event.orig_dst_addr.to_string(),
                    dst_port: event.orig_dst_port,
                },
            };

            log.debug(
                "NetFilter delete connection",
                &[
                    ("id", &event.id.to_string()),
                    ("username", &entry.username),
                    ("srcAddr", &entry.src_addr),
                    ("dstAddr", &entry.dst_addr),
                ],
            );
            match serde_json::to_value(&entry) {
                Ok(value) => log.info_json(LOG_CHANNEL, value),
                Err(e) => log.error(
                    "Failed to encode connection record",
                    &[("err", &e.to_string())],
                ),
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}
