//! Authorize and accounting handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;

use crate::sessions::VpnConnectionState;
use crate::state::AppState;

use super::attrs::{single_i64, single_string, AttributeMap, RadiusAttribute};
use super::logproj::log_radius_exchange;

/// Upper bound on request bodies from the bridge.
const MAX_BODY_BYTES: usize = 1 << 16;

#[derive(Debug, Deserialize)]
struct RadiusQuery {
    #[serde(default)]
    action: String,
}

/// Build the bridge router.
pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/radius/", post(radius_handler))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(app)
}

async fn radius_handler(
    State(app): State<Arc<AppState>>,
    Query(query): Query<RadiusQuery>,
    body: Bytes,
) -> Response {
    if body.len() > MAX_BODY_BYTES {
        app.log.error(
            "Request body too large",
            &[("length", &body.len().to_string())],
        );
        return json_status(StatusCode::UNAUTHORIZED);
    }

    let request: AttributeMap = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            app.log
                .error("Failed to decode request body", &[("err", &e.to_string())]);
            return json_status(StatusCode::UNAUTHORIZED);
        }
    };

    if query.action == "authorize" {
        authorize(app, request).await
    } else {
        accounting(app, request).await
    }
}

/// Authorize: identity lookup → credential lookup → reply composition.
///
/// All four exit paths (one 200, three 401) emit one audit record.
async fn authorize(app: Arc<AppState>, request: AttributeMap) -> Response {
    let username = single_string(&request, "User-Name").unwrap_or("").to_string();
    let ip_address = single_string(&request, "Calling-Station-Id")
        .unwrap_or("")
        .to_string();

    let Some(user) = app.identity.resolve_user(&username).await else {
        spawn_exchange_log(&app, "RadiusAuthorize", 401, request, None);
        app.log
            .error("Failed to get VPN user by username", &[("username", &username)]);
        return json_status(StatusCode::UNAUTHORIZED);
    };

    if user.class.is_empty() {
        spawn_exchange_log(&app, "RadiusAuthorize", 401, request, None);
        app.log
            .error("Failed to get VPN user class", &[("username", &username)]);
        return json_status(StatusCode::UNAUTHORIZED);
    }

    let Some(nt_password) = app.credentials.get_nt_hash(&user, &ip_address).await else {
        spawn_exchange_log(&app, "RadiusAuthorize", 401, request, None);
        app.log
            .error("Failed to get VPN user NT password", &[("username", &username)]);
        return json_status(StatusCode::UNAUTHORIZED);
    };

    let mut reply = AttributeMap::new();
    reply.insert(
        "control:NT-Password".into(),
        RadiusAttribute::string(nt_password),
    );
    reply.insert("reply:Class".into(), RadiusAttribute::string(&user.class));

    let dns_servers = &app.settings.client.dns_servers;
    if let Some(primary) = dns_servers.first() {
        reply.insert(
            "reply:MS-Primary-DNS-Server".into(),
            RadiusAttribute::string(primary),
        );
    }
    if let Some(secondary) = dns_servers.get(1) {
        reply.insert(
            "reply:MS-Secondary-DNS-Server".into(),
            RadiusAttribute::string(secondary),
        );
    }

    spawn_exchange_log(&app, "RadiusAuthorize", 200, request, Some(reply.clone()));
    app.log.debug(
        "Radius authorize",
        &[("username", &user.username), ("class", &user.class)],
    );

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        axum::Json(reply),
    )
        .into_response()
}

/// Accounting: maintain the session table. The reply is always 204.
async fn accounting(app: Arc<AppState>, request: AttributeMap) -> Response {
    let username = single_string(&request, "User-Name").unwrap_or("").to_string();
    let framed_ip = single_string(&request, "Framed-IP-Address")
        .unwrap_or("")
        .to_string();
    let status_type = single_string(&request, "Acct-Status-Type")
        .unwrap_or("")
        .to_string();
    let input_octets = single_i64(&request, "Acct-Input-Octets").unwrap_or(0);
    let input_packets = single_i64(&request, "Acct-Input-Packets").unwrap_or(0);
    let output_octets = single_i64(&request, "Acct-Output-Octets").unwrap_or(0);
    let output_packets = single_i64(&request, "Acct-Output-Packets").unwrap_or(0);

    if !username.is_empty() && !framed_ip.is_empty() && !status_type.is_empty() {
        match status_type.as_str() {
            "Start" => {
                app.log.debug(
                    "Radius create VPN connection",
                    &[("framedIpAddress", &framed_ip), ("username", &username)],
                );
                app.sessions
                    .insert(&framed_ip, Arc::new(VpnConnectionState::new(&username)));
            }
            "Stop" => match app.sessions.remove(&framed_ip) {
                None => {
                    app.log.error(
                        "Radius delete VPN connection failed, connection missing",
                        &[("framedIpAddress", &framed_ip)],
                    );
                }
                Some(state) if state.username() != username => {
                    app.log.error(
                        "Radius delete VPN connection failed, username mismatch",
                        &[("framedIpAddress", &framed_ip), ("username", &username)],
                    );
                }
                Some(_) => {
                    app.log.debug(
                        "Radius delete VPN connection",
                        &[("framedIpAddress", &framed_ip), ("username", &username)],
                    );
                }
            },
            "Interim-Update" => {
                let counters_valid = input_octets > 0
                    && input_packets > 0
                    && output_octets > 0
                    && output_packets > 0;
                if counters_valid {
                    match app.sessions.get(&framed_ip) {
                        None => {
                            app.log.error(
                                "Radius update VPN connection failed, unknown connection",
                                &[("framedIpAddress", &framed_ip)],
                            );
                        }
                        Some(state) => {
                            if state.username() != username {
                                app.log.error(
                                    "Radius update VPN connection failed, username mismatch",
                                    &[
                                        ("framedIpAddress", &framed_ip),
                                        ("username", &username),
                                    ],
                                );
                                state.set_username(&username);
                            }
                            state.store_counters(
                                input_octets,
                                output_octets,
                                input_packets,
                                output_packets,
                            );
                        }
                    }
                }
            }
            _ => {}
        }

        spawn_exchange_log(&app, "RadiusAccounting", 204, request, None);
    }

    json_status(StatusCode::NO_CONTENT)
}

/// Fire-and-forget audit record.
fn spawn_exchange_log(
    app: &Arc<AppState>,
    stream: &'static str,
    status: u16,
    request: AttributeMap,
    reply: Option<AttributeMap>,
) {
    let log = app.log.clone();
    tokio::spawn(async move {
        log_radius_exchange(&*log, stream, status, &request, reply.as_ref());
    });
}

fn json_status(status: StatusCode) -> Response {
    (
        status,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
        ],
    )
        .into_response()
}
