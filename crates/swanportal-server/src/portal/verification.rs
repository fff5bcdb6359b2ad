//! Session verification endpoint.
//!
//! A connected VPN client (or a support tool acting for it) calls
//! `/verification/` from inside the tunnel; the reply is the caller's own
//! session counters keyed by its framed IP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::handlers::client_ip;
use super::PortalContext;

/// Verification reply; field names are part of the public interface.
#[derive(Debug, Serialize)]
pub struct VerificationReply {
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "IpAddress")]
    pub ip_address: String,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "ClientToServerBytes")]
    pub client_to_server_bytes: i64,
    #[serde(rename = "ServerToClientBytes")]
    pub server_to_client_bytes: i64,
    #[serde(rename = "ClientToServerPackets")]
    pub client_to_server_packets: i64,
    #[serde(rename = "ServerToClientPackets")]
    pub server_to_client_packets: i64,
}

/// CORS-enabled JSON view of the caller's session.
pub async fn verification_handler(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
) -> Response {
    let cors = [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ),
    ];

    if method == Method::OPTIONS {
        return (StatusCode::OK, cors).into_response();
    }

    let ip = client_ip(addr);
    let Some(state) = ctx.app.sessions.get(&ip) else {
        ctx.app.log.error(
            "Verification for unknown VPN connection",
            &[("ipAddress", &ip)],
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, cors).into_response();
    };

    let snapshot = state.snapshot();
    let reply = VerificationReply {
        timestamp: unix_millis(),
        ip_address: ip,
        username: state.username(),
        client_to_server_bytes: snapshot.client_to_server_bytes,
        server_to_client_bytes: snapshot.server_to_client_bytes,
        client_to_server_packets: snapshot.client_to_server_packets,
        server_to_client_packets: snapshot.server_to_client_packets,
    };

    (StatusCode::OK, cors, axum::Json(reply)).into_response()
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
