//! Portal page handlers.
//!
//! Every page goes through the same envelope: resolve the client IP,
//! enforce CSRF on mutating methods, mint a fresh CSRF value, negotiate
//! the language, run the page logic, then render the localized template
//! (or redirect) with the cookies attached.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Form, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::cookies::{cookie_value, set_cookie};
use super::csrf;
use super::email::build_self_service_email;
use super::lang;
use super::password::{colorize_password, generate_password};
use super::token::{WebAccessToken, TOKEN_TTL};
use super::PortalContext;

/// Log channel for portal requests.
const LOG_CHANNEL: &str = "WebUI";

/// The requester's IP address, without the port.
pub fn client_ip(addr: SocketAddr) -> String {
    addr.ip().to_string()
}

/// Emit one structured request record to the `WebUI` channel.
pub(super) fn log_http_request(
    ctx: &PortalContext,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    ip: &str,
    status: StatusCode,
    error: &str,
) {
    let mut header_map = serde_json::Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();
        header_map.insert(name.to_string(), Value::Array(values));
    }

    ctx.app.log.info_json(
        LOG_CHANNEL,
        json!({
            "status": status.as_u16(),
            "uri": uri.to_string(),
            "method": method.to_string(),
            "headers": header_map,
            "ip_address": ip,
            "error": error,
        }),
    );
}

/// Per-request page context shared by every handler.
pub(super) struct PageScope {
    pub client_ip: String,
    pub csrf: String,
    pub tags: Vec<String>,
    pub set_cookies: Vec<String>,
    pub path: String,
}

/// Common preamble: CSRF enforcement (when `csrf_form` is given), fresh
/// CSRF mint, language negotiation.
pub(super) fn begin_page(
    ctx: &PortalContext,
    addr: SocketAddr,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    csrf_form: Option<Option<&str>>,
) -> Result<PageScope, Response> {
    let ip = client_ip(addr);

    if let Some(form_value) = csrf_form {
        let cookie = cookie_value(headers, csrf::CSRF_COOKIE);
        if let Err(e) = csrf::verify(&ctx.app.tokens, form_value, cookie.as_deref(), &ip) {
            log_http_request(
                ctx,
                method,
                uri,
                headers,
                &ip,
                StatusCode::BAD_REQUEST,
                &e.to_string(),
            );
            return Err(StatusCode::BAD_REQUEST.into_response());
        }
    }

    let Some(csrf_value) = csrf::mint(&ctx.app.tokens, &ip) else {
        log_http_request(
            ctx,
            method,
            uri,
            headers,
            &ip,
            StatusCode::BAD_REQUEST,
            "failed to mint CSRF token",
        );
        return Err(StatusCode::BAD_REQUEST.into_response());
    };

    let negotiated = lang::negotiate(headers, query_param(uri, "bcp47tag").as_deref());

    let mut set_cookies = vec![set_cookie(
        csrf::CSRF_COOKIE,
        &csrf_value,
        csrf::CSRF_COOKIE_MAX_AGE_SECS,
    )];
    set_cookies.extend(negotiated.set_cookie);

    Ok(PageScope {
        client_ip: ip,
        csrf: csrf_value,
        tags: negotiated.tags,
        set_cookies,
        path: uri.path().to_string(),
    })
}

/// Render a localized template with the scope's cookies attached.
pub(super) fn render_page(
    ctx: &PortalContext,
    scope: &PageScope,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    status: StatusCode,
    template: &str,
    form: Value,
) -> Response {
    let context = json!({
        "remote_addr": scope.client_ip,
        "path": scope.path,
        "form": form,
    });

    let Some(body) = ctx.templates.render(template, &scope.tags, &context) else {
        log_http_request(
            ctx,
            method,
            uri,
            headers,
            &scope.client_ip,
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to find template {template}"),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    log_http_request(ctx, method, uri, headers, &scope.client_ip, status, "");

    let mut response = (
        status,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
        ],
        body,
    )
        .into_response();
    attach_cookies(&mut response, &scope.set_cookies);
    response
}

/// Redirect with the scope's cookies attached.
pub(super) fn redirect_page(
    ctx: &PortalContext,
    scope: &PageScope,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    location: &str,
) -> Response {
    log_http_request(
        ctx,
        method,
        uri,
        headers,
        &scope.client_ip,
        StatusCode::FOUND,
        "",
    );

    let mut response = redirect(StatusCode::FOUND, location);
    attach_cookies(&mut response, &scope.set_cookies);
    response
}

/// Plain redirect; axum's helpers emit 303/308, the portal needs the
/// classic 302/301.
fn redirect(status: StatusCode, location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (status, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn attach_cookies(response: &mut Response, cookies: &[String]) {
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn host_header(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

// ── Pages ─────────────────────────────────────────────────────────

/// `GET /`: landing page.
pub async fn index_handler(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let scope = match begin_page(&ctx, addr, &method, &uri, &headers, None) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    let form = json!({
        "private_hostname": ctx.app.settings.server.verification_hostname,
    });
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::OK,
        "webui-index.html",
        form,
    )
}

/// Any unknown path renders the localized error page.
pub async fn fallback_handler(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let scope = match begin_page(&ctx, addr, &method, &uri, &headers, None) {
        Ok(scope) => scope,
        Err(response) => return response,
    };
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::NOT_FOUND,
        "webui-error.html",
        Value::Null,
    )
}

/// `GET /error/`: explicit error page.
pub async fn error_page_handler(
    state: State<Arc<PortalContext>>,
    connect_info: ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    fallback_handler(state, connect_info, method, uri, headers).await
}

/// `GET /self-service/`: the request form.
pub async fn self_service_get(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let scope = match begin_page(&ctx, addr, &method, &uri, &headers, None) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    let form = json!({"csrf": scope.csrf});
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::OK,
        "webui-self-service.html",
        form,
    )
}

#[derive(Debug, Deserialize)]
pub struct SelfServiceForm {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    csrf: Option<String>,
}

/// `POST /self-service/`: create-password request.
///
/// Whether or not the email resolves to a user, the reply is a redirect
/// to the "sent" page; the only observable difference lives in the mail
/// spool.
pub async fn self_service_post(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<SelfServiceForm>,
) -> Response {
    let scope = match begin_page(
        &ctx,
        addr,
        &method,
        &uri,
        &headers,
        Some(form.csrf.as_deref()),
    ) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    if form.action.as_deref() == Some("create-password") {
        let email = form.email.unwrap_or_default();
        let sent = "/self-service/create-password/sent/";

        let Some(user) = ctx.app.identity.resolve_user(&email).await else {
            ctx.app.log.error(
                "Failed to get VPN user by username",
                &[("remoteIpAddress", &scope.client_ip), ("username", &email)],
            );
            return redirect_page(&ctx, &scope, &method, &uri, &headers, sent);
        };

        let token = WebAccessToken {
            username: email.clone(),
            ip_address: scope.client_ip.clone(),
        };
        let token_text = match ctx.app.tokens.issue(&token) {
            Ok(token_text) => token_text,
            Err(e) => {
                ctx.app.log.error(
                    "Failed to encrypt create password token",
                    &[("err", &e.to_string()), ("remoteIpAddress", &scope.client_ip)],
                );
                return redirect_page(&ctx, &scope, &method, &uri, &headers, sent);
            }
        };

        let host = host_header(&headers);
        let client = &ctx.app.settings.client;
        let context = json!({
            "server_host": host,
            "ip_address": scope.client_ip,
            "username": user.username,
            "token": token_text,
            "dns_suffix": client.dns_suffix,
            "dns_servers": client.dns_servers,
            "destination_prefixes": client.destination_prefixes,
        });

        let Some(message) = build_self_service_email(
            &*ctx.app.log,
            &ctx.templates,
            &ctx.attachments,
            &host,
            &scope.tags,
            &context,
        ) else {
            return redirect_page(&ctx, &scope, &method, &uri, &headers, sent);
        };

        if let Err(e) = ctx
            .app
            .mailer
            .send(
                &user.email,
                &message.subject,
                &message.body_text,
                &message.body_html,
                message.attachments,
            )
            .await
        {
            ctx.app.log.error(
                "Failed to send email",
                &[("err", &e.to_string()), ("recipientAddress", &user.email)],
            );
        } else {
            ctx.app.log.debug(
                "Sent email",
                &[("recipientAddress", &user.email)],
            );
        }

        return redirect_page(&ctx, &scope, &method, &uri, &headers, sent);
    }

    let form = json!({"csrf": scope.csrf});
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::OK,
        "webui-self-service.html",
        form,
    )
}

/// `GET /self-service/create-password/sent/`: confirmation page.
pub async fn sent_handler(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let scope = match begin_page(&ctx, addr, &method, &uri, &headers, None) {
        Ok(scope) => scope,
        Err(response) => return response,
    };
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::CREATED,
        "webui-self-service-create-password-sent.html",
        Value::Null,
    )
}

#[derive(Debug, Deserialize)]
pub struct DoneQuery {
    #[serde(default)]
    token: Option<String>,
}

/// `GET /self-service/create-password/done/`: token redemption.
///
/// The token text is marked used before any verification runs, which is
/// what makes a replay fail even while the envelope is still fresh.
pub async fn done_handler(
    State(ctx): State<Arc<PortalContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<DoneQuery>,
) -> Response {
    let scope = match begin_page(&ctx, addr, &method, &uri, &headers, None) {
        Ok(scope) => scope,
        Err(response) => return response,
    };

    let fail = |ctx: &PortalContext, scope: &PageScope| {
        render_page(
            ctx,
            scope,
            &method,
            &uri,
            &headers,
            StatusCode::UNAUTHORIZED,
            "webui-self-service-create-password-fail.html",
            Value::Null,
        )
    };

    let token_text = query.token.unwrap_or_default();
    if token_text.is_empty() {
        ctx.app.log.error(
            "Missing create password token",
            &[("remoteIpAddress", &scope.client_ip)],
        );
        return fail(&ctx, &scope);
    }

    if !ctx.app.tokens.mark_used(&token_text) {
        ctx.app.log.error(
            "Reused create password token",
            &[("remoteIpAddress", &scope.client_ip)],
        );
        return fail(&ctx, &scope);
    }

    let token: WebAccessToken = match ctx.app.tokens.redeem(&token_text, TOKEN_TTL) {
        Ok(token) => token,
        Err(_) => {
            ctx.app.log.error(
                "Failed to decrypt create password token",
                &[("remoteIpAddress", &scope.client_ip)],
            );
            return fail(&ctx, &scope);
        }
    };

    if token.ip_address != scope.client_ip {
        ctx.app.log.error(
            "IP address mismatch",
            &[
                ("remoteIpAddress", &scope.client_ip),
                ("tokenIpAddress", &token.ip_address),
            ],
        );
        return fail(&ctx, &scope);
    }

    let password = generate_password();

    let Some(user) = ctx.app.identity.resolve_user(&token.username).await else {
        ctx.app.log.error(
            "Failed to get VPN user by username",
            &[
                ("remoteIpAddress", &scope.client_ip),
                ("username", &token.username),
            ],
        );
        return fail(&ctx, &scope);
    };

    ctx.app
        .credentials
        .set_password(&user, &scope.client_ip, &password)
        .await;

    let form = json!({
        "ip_address": scope.client_ip,
        "username": token.username,
        "password": colorize_password(&password),
    });
    render_page(
        &ctx,
        &scope,
        &method,
        &uri,
        &headers,
        StatusCode::OK,
        "webui-self-service-create-password-done.html",
        form,
    )
}

/// Port-80 catch-all: permanent redirect to the TLS listener.
pub async fn redirect_to_https(headers: HeaderMap, uri: Uri) -> Response {
    let host = host_header(&headers);
    redirect(StatusCode::MOVED_PERMANENTLY, &format!("https://{host}{uri}"))
}
