//! IPsec event listener worker.
//!
//! Holds a VICI session on the IKE daemon's control socket, subscribes to
//! a fixed set of event streams, and forwards every event as one
//! structured record. Connection loss is routine (the daemon restarts
//! independently), so the worker reconnects with 1-second backoff.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use swanportal_vici::ViciClient;

use crate::state::AppState;
use crate::supervisor::WorkerHandle;

/// Log channel for daemon events.
const LOG_CHANNEL: &str = "StrongSwanVici";

/// Event streams the listener subscribes to.
pub const VICI_EVENTS: [&str; 4] = ["log", "ike-updown", "ike-update", "child-updown"];

/// Run the IPsec event listener until shutdown.
pub async fn run(app: Arc<AppState>, worker: WorkerHandle) {
    let log = app.log.clone();
    let socket_path = app.settings.server.vici_socket.clone();

    loop {
        let mut client = match ViciClient::connect(&socket_path).await {
            Ok(client) => client,
            Err(e) => {
                log.error(
                    "Failed to connect to IKE daemon",
                    &[("err", &e.to_string()), ("socket", &socket_path)],
                );
                if pause_or_quit(&worker).await {
                    break;
                }
                continue;
            }
        };

        let version = match client.request("version").await {
            Ok(version) => version,
            Err(e) => {
                log.error("Failed to query version", &[("err", &e.to_string())]);
                if pause_or_quit(&worker).await {
                    break;
                }
                continue;
            }
        };
        log.info_json(LOG_CHANNEL, version);

        log.debug("VICI initialization completed", &[]);
        worker.report_init_completed();

        let mut subscribed = true;
        for event in VICI_EVENTS {
            if let Err(e) = client.subscribe(event).await {
                log.error(
                    "Failed to subscribe",
                    &[("err", &e.to_string()), ("event", event)],
                );
                subscribed = false;
                break;
            }
        }
        if !subscribed {
            if pause_or_quit(&worker).await {
                break;
            }
            continue;
        }

        loop {
            tokio::select! {
                _ = worker.cancelled() => {
                    log.debug("Terminating VICI...", &[]);
                    log.debug("VICI termination completed", &[]);
                    worker.report_quit_completed();
                    return;
                }
                result = client.next_event() => match result {
                    Ok((name, message)) => forward_event(&*log, name, message),
                    Err(e) => {
                        log.error("VICI event stream error", &[("err", &e.to_string())]);
                        break;
                    }
                }
            }
        }

        if pause_or_quit(&worker).await {
            break;
        }
    }

    worker.report_init_completed();
    worker.report_quit_completed();
}

fn forward_event(log: &dyn swanportal_adapters::LogSink, name: String, message: Value) {
    let mut record = match message {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("message".to_string(), other);
            map
        }
    };
    record.insert("event".to_string(), Value::String(name));
    log.info_json(LOG_CHANNEL, Value::Object(record));
}

/// Back off for a second; `true` means quit was requested meanwhile.
async fn pause_or_quit(worker: &WorkerHandle) -> bool {
    tokio::select! {
        _ = worker.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_secs(1)) => false,
    }
}
