//! End-to-end portal and RADIUS flows over in-memory collaborators.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use regex::Regex;
use serde_json::{json, Value};
use tower::ServiceExt;

use swanportal_adapters::{
    DirectoryGroup, DirectoryUser, EmailEntry, MemoryDirectory, MemoryLogSink, MemoryMailer,
    MemoryObjectStore,
};
use swanportal_config::AppSettings;
use swanportal_creds::{nt_hash, CredentialStore};
use swanportal_envelope::KeyRing;
use swanportal_identity::IdentityResolver;
use swanportal_server::portal::{https_router, PortalContext};
use swanportal_server::{radius, AppState};

const HOST: &str = "vpn.example.com";
const CLIENT_A: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 7)),
    50000,
);
const CLIENT_B: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 9)),
    50001,
);

struct Harness {
    app: Arc<AppState>,
    mailer: Arc<MemoryMailer>,
    portal: axum::Router,
    radius: axum::Router,
    _data_dir: tempfile::TempDir,
}

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn seed_templates(data_dir: &Path) {
    let t = data_dir.join("template");
    write(&t, "en/webui-index.html", "<h1>{{form.private_hostname}}</h1>");
    write(&t, "en/webui-error.html", "<h1>error</h1>");
    write(&t, "en/webui-self-service.html", "<form>{{form.csrf}}</form>");
    write(
        &t,
        "en/webui-self-service-create-password-sent.html",
        "<p>sent</p>",
    );
    write(
        &t,
        "en/webui-self-service-create-password-done.html",
        "<p>{{form.username}}</p><code>{{& form.password}}</code>",
    );
    write(
        &t,
        "en/webui-self-service-create-password-fail.html",
        "<p>fail</p>",
    );
    write(&t, "en/email-create-password-subject.txt", "VPN access");
    write(
        &t,
        "en/email-create-password-body.txt",
        "Open https://{{server_host}}/self-service/create-password/done/?token={{token}} from {{ip_address}}",
    );
    write(&t, "en/email-create-password-body.html", "<p>{{username}}</p>");
    write(
        &t,
        "en/email-create-password-attachment-vpn-setup-linux.sh",
        "#!/bin/sh\nDNS={{dns_servers}}\n",
    );
    write(
        &t,
        "en/email-create-password-attachment-vpn-setup-windows.ps1",
        "$dns = \"{{dns_servers}}\"\n",
    );
    write(&data_dir.join("attachment"), "logo.png", "png");
}

fn harness() -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    seed_templates(data_dir.path());

    let log = Arc::new(MemoryLogSink::new());

    let directory = Arc::new(MemoryDirectory::new());
    directory.add_user(DirectoryUser {
        user_id: "u-1".into(),
        user_name: "alice".into(),
        display_name: "Alice Example".into(),
        emails: vec![EmailEntry {
            value: "alice@example.com".into(),
            primary: true,
        }],
        external_ids: vec![],
    });
    directory.add_group(DirectoryGroup {
        group_id: "g-1".into(),
        display_name: "vpn-staff".into(),
        external_ids: vec![],
    });
    directory.add_membership("u-1", "g-1");

    let identity = Arc::new(IdentityResolver::new(
        directory,
        log.clone(),
        Regex::new(r"^vpn-(\w+)$").unwrap(),
    ));
    let credentials = Arc::new(CredentialStore::new(
        Arc::new(MemoryObjectStore::new()),
        KeyRing::ephemeral(),
        log.clone(),
        "test-bucket",
    ));
    let mailer = Arc::new(MemoryMailer::new());

    let mut settings = AppSettings::default();
    settings.server.data_dir = data_dir.path().to_str().unwrap().to_string();
    settings.server.verification_hostname = "portal-1".into();
    settings.client.dns_servers = vec!["10.0.0.2".into()];
    settings.client.dns_suffix = "corp.example.com".into();

    let app = Arc::new(AppState::new(
        settings,
        log,
        identity,
        credentials,
        mailer.clone(),
    ));

    let ctx = Arc::new(PortalContext::new(app.clone()));

    Harness {
        portal: https_router(ctx),
        radius: radius::router(app.clone()),
        app,
        mailer,
        _data_dir: data_dir,
    }
}

fn with_addr(mut request: Request<Body>, addr: SocketAddr) -> Request<Body> {
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Fetch the self-service form and return the minted CSRF value.
async fn fetch_csrf(harness: &Harness, addr: SocketAddr) -> String {
    let response = harness
        .portal
        .clone()
        .oneshot(with_addr(
            Request::builder()
                .uri("/self-service/")
                .header(header::HOST, HOST)
                .body(Body::empty())
                .unwrap(),
            addr,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("csrf="))
        .expect("csrf cookie")
        .to_string();
    cookie
        .trim_start_matches("csrf=")
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// POST the create-password form; returns the response.
async fn post_create_password(
    harness: &Harness,
    addr: SocketAddr,
    email: &str,
    csrf_form: &str,
    csrf_cookie: &str,
) -> axum::response::Response {
    let body = format!(
        "action=create-password&email={}&csrf={}",
        email.replace('@', "%40"),
        csrf_form
    );
    harness
        .portal
        .clone()
        .oneshot(with_addr(
            Request::builder()
                .method("POST")
                .uri("/self-service/")
                .header(header::HOST, HOST)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::COOKIE, format!("csrf={csrf_cookie}"))
                .body(Body::from(body))
                .unwrap(),
            addr,
        ))
        .await
        .unwrap()
}

/// Extract the token from the latest spooled message body.
fn latest_token(harness: &Harness) -> String {
    let sent = harness.mailer.sent();
    let body = &sent.last().expect("sent email").body_text;
    let start = body.find("token=").expect("token in body") + "token=".len();
    body[start..]
        .split_whitespace()
        .next()
        .unwrap()
        .to_string()
}

async fn follow_token(
    harness: &Harness,
    addr: SocketAddr,
    token: &str,
) -> axum::response::Response {
    harness
        .portal
        .clone()
        .oneshot(with_addr(
            Request::builder()
                .uri(format!("/self-service/create-password/done/?token={token}"))
                .header(header::HOST, HOST)
                .body(Body::empty())
                .unwrap(),
            addr,
        ))
        .await
        .unwrap()
}

fn extract_password(done_body: &str) -> String {
    let span = Regex::new(r#"<span class="[^"]+">(.)</span>"#).unwrap();
    span.captures_iter(done_body)
        .map(|c| c[1].to_string())
        .collect()
}

async fn radius_post(harness: &Harness, action: &str, body: Value) -> (StatusCode, Value) {
    let response = harness
        .radius
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/radius/?action={action}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_full_happy_path() {
    let harness = harness();

    // Request access.
    let csrf = fetch_csrf(&harness, CLIENT_A).await;
    let response =
        post_create_password(&harness, CLIENT_A, "alice@example.com", &csrf, &csrf).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/self-service/create-password/sent/"
    );

    // The mail carries the token and the setup-script ZIP.
    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "alice@example.com");
    let zip_attachment = sent[0].attachments.last().unwrap();
    assert_eq!(zip_attachment.file_name, format!("VPN-[{HOST}].zip"));
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(zip_attachment.content.clone())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names[0].contains("Linux"));
    assert!(names[1].contains("Windows"));

    // Redeem from the same IP.
    let token = latest_token(&harness);
    let response = follow_token(&harness, CLIENT_A, &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let password = extract_password(&body);
    assert_eq!(password.len(), 20);

    // The concentrator can now authorize with the stored NT hash.
    let (status, reply) = radius_post(
        &harness,
        "authorize",
        json!({
            "User-Name": {"type": "string", "value": ["alice@example.com"]},
            "Calling-Station-Id": {"type": "string", "value": ["203.0.113.7"]},
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["control:NT-Password"]["value"][0], nt_hash(&password));
    assert_eq!(reply["reply:Class"]["value"][0], "staff");
}

#[tokio::test]
async fn test_token_replay_is_rejected() {
    let harness = harness();

    let csrf = fetch_csrf(&harness, CLIENT_A).await;
    post_create_password(&harness, CLIENT_A, "alice@example.com", &csrf, &csrf).await;
    let token = latest_token(&harness);

    let first = follow_token(&harness, CLIENT_A, &token).await;
    assert_eq!(first.status(), StatusCode::OK);
    let password = extract_password(&body_string(first).await);

    // Replay: rejected, and the stored credential is unchanged.
    let second = follow_token(&harness, CLIENT_A, &token).await;
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);

    let user = harness
        .app
        .identity
        .resolve_user("alice@example.com")
        .await
        .unwrap();
    assert_eq!(
        harness.app.credentials.get_nt_hash(&user, "203.0.113.7").await,
        Some(nt_hash(&password))
    );
}

#[tokio::test]
async fn test_token_bound_to_requesting_ip() {
    let harness = harness();

    let csrf = fetch_csrf(&harness, CLIENT_A).await;
    post_create_password(&harness, CLIENT_A, "alice@example.com", &csrf, &csrf).await;
    let token = latest_token(&harness);

    let response = follow_token(&harness, CLIENT_B, &token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_email_gets_same_redirect() {
    let harness = harness();

    let csrf = fetch_csrf(&harness, CLIENT_A).await;
    let response =
        post_create_password(&harness, CLIENT_A, "nobody@example.com", &csrf, &csrf).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/self-service/create-password/sent/"
    );
    assert!(harness.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_csrf_cookie_form_mismatch_rejected() {
    let harness = harness();

    let form_value = fetch_csrf(&harness, CLIENT_A).await;
    let cookie_value = fetch_csrf(&harness, CLIENT_A).await;
    assert_ne!(form_value, cookie_value);

    let response = post_create_password(
        &harness,
        CLIENT_A,
        "alice@example.com",
        &form_value,
        &cookie_value,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_csrf_ip_mismatch_rejected() {
    let harness = harness();

    // Token minted for CLIENT_B, replayed from CLIENT_A with matching
    // cookie and form values.
    let csrf = fetch_csrf(&harness, CLIENT_B).await;
    let response =
        post_create_password(&harness, CLIENT_A, "alice@example.com", &csrf, &csrf).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accounting_drives_verification() {
    let harness = harness();
    let framed: SocketAddr = "10.0.0.7:40000".parse().unwrap();

    let verification = |harness: &Harness| {
        harness.portal.clone().oneshot(with_addr(
            Request::builder()
                .uri("/verification/")
                .header(header::HOST, HOST)
                .body(Body::empty())
                .unwrap(),
            framed,
        ))
    };

    // Before Start: no session.
    let response = verification(&harness).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    radius_post(
        &harness,
        "accounting",
        json!({
            "User-Name": {"type": "string", "value": ["bob"]},
            "Framed-IP-Address": {"type": "string", "value": ["10.0.0.7"]},
            "Acct-Status-Type": {"type": "string", "value": ["Start"]},
        }),
    )
    .await;

    let response = verification(&harness).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(report["Username"], "bob");
    assert_eq!(report["IpAddress"], "10.0.0.7");
    assert_eq!(report["ClientToServerBytes"], 0);

    radius_post(
        &harness,
        "accounting",
        json!({
            "User-Name": {"type": "string", "value": ["bob"]},
            "Framed-IP-Address": {"type": "string", "value": ["10.0.0.7"]},
            "Acct-Status-Type": {"type": "string", "value": ["Interim-Update"]},
            "Acct-Input-Octets": {"type": "integer", "value": [100]},
            "Acct-Output-Octets": {"type": "integer", "value": [200]},
            "Acct-Input-Packets": {"type": "integer", "value": [2]},
            "Acct-Output-Packets": {"type": "integer", "value": [3]},
        }),
    )
    .await;

    let response = verification(&harness).await.unwrap();
    let report: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(report["ClientToServerBytes"], 100);
    assert_eq!(report["ServerToClientBytes"], 200);
    assert_eq!(report["ClientToServerPackets"], 2);
    assert_eq!(report["ServerToClientPackets"], 3);
    assert!(report["Timestamp"].as_i64().unwrap() > 0);

    radius_post(
        &harness,
        "accounting",
        json!({
            "User-Name": {"type": "string", "value": ["bob"]},
            "Framed-IP-Address": {"type": "string", "value": ["10.0.0.7"]},
            "Acct-Status-Type": {"type": "string", "value": ["Stop"]},
        }),
    )
    .await;

    let response = verification(&harness).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_port_80_redirects_to_https() {
    let harness = harness();
    let ctx = Arc::new(PortalContext::new(harness.app.clone()));
    let router = swanportal_server::portal::http_router(ctx);

    let response = router
        .oneshot(with_addr(
            Request::builder()
                .uri("/self-service/?x=1")
                .header(header::HOST, HOST)
                .body(Body::empty())
                .unwrap(),
            CLIENT_A,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("https://{HOST}/self-service/?x=1")
    );
}
