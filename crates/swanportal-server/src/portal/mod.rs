//! Self-service web portal worker.
//!
//! Two listeners: port 80 redirects to TLS (and serves the favicon), the
//! TLS listener carries the self-service flow, static assets, and the
//! verification endpoint. The TLS certificate is re-read from disk every
//! thirty minutes.

pub mod cookies;
pub mod csrf;
pub mod email;
pub mod handlers;
pub mod lang;
pub mod overlayfs;
pub mod password;
pub mod static_files;
pub mod templates;
pub mod tls;
pub mod token;
pub mod verification;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;

use swanportal_adapters::LogSink;

use crate::state::AppState;
use crate::supervisor::{WorkerHandle, SHUTDOWN_TIMEOUT};

use overlayfs::OverlayFs;
use templates::TemplateSet;
use tls::CertificateStore;

/// Interval between TLS certificate reloads.
const CERT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Shared portal context: app state plus the asset overlays.
pub struct PortalContext {
    pub app: Arc<AppState>,
    pub templates: TemplateSet,
    pub webroot: OverlayFs,
    pub attachments: OverlayFs,
}

impl PortalContext {
    /// Build the context from the configured data and site directories.
    pub fn new(app: Arc<AppState>) -> Self {
        let server = &app.settings.server;
        let templates = TemplateSet::new(OverlayFs::for_subdir(
            &server.site_dir,
            &server.data_dir,
            "template",
        ));
        let webroot = OverlayFs::for_subdir(&server.site_dir, &server.data_dir, "webroot");
        let attachments =
            OverlayFs::for_subdir(&server.site_dir, &server.data_dir, "attachment");

        Self {
            app,
            templates,
            webroot,
            attachments,
        }
    }
}

/// Router served on the TLS listener.
pub fn https_router(ctx: Arc<PortalContext>) -> Router {
    Router::new()
        .route("/static/{*path}", get(static_files::static_handler))
        .route("/favicon.ico", get(static_files::static_handler))
        .route("/verification/", any(verification::verification_handler))
        .route("/error/", get(handlers::error_page_handler))
        .route(
            "/self-service/",
            get(handlers::self_service_get).post(handlers::self_service_post),
        )
        .route(
            "/self-service/create-password/sent/",
            get(handlers::sent_handler),
        )
        .route(
            "/self-service/create-password/done/",
            get(handlers::done_handler),
        )
        .route("/", get(handlers::index_handler))
        .fallback(handlers::fallback_handler)
        .with_state(ctx)
}

/// Router served on the plain HTTP listener.
pub fn http_router(ctx: Arc<PortalContext>) -> Router {
    Router::new()
        .route("/favicon.ico", get(static_files::static_handler))
        .fallback(handlers::redirect_to_https)
        .with_state(ctx)
}

/// Run the portal worker until shutdown.
pub async fn run(app: Arc<AppState>, worker: WorkerHandle) {
    let log = app.log.clone();
    let server = &app.settings.server;

    let (http_addr, https_addr): (SocketAddr, SocketAddr) =
        match (server.http_listen.parse(), server.https_listen.parse()) {
            (Ok(http_addr), Ok(https_addr)) => (http_addr, https_addr),
            _ => {
                log.error(
                    "Invalid portal listen address",
                    &[
                        ("httpListen", &server.http_listen),
                        ("httpsListen", &server.https_listen),
                    ],
                );
                worker.report_init_completed();
                worker.cancelled().await;
                worker.report_quit_completed();
                return;
            }
        };

    let ctx = Arc::new(PortalContext::new(app.clone()));

    let cert_store = Arc::new(CertificateStore::new(
        &server.tls_certificate_path,
        &server.tls_private_key_path,
    ));
    let rustls_config = RustlsConfig::from_config(Arc::new(tls::server_config(cert_store.clone())));

    let http_handle = axum_server::Handle::new();
    let https_handle = axum_server::Handle::new();

    spawn_http_listener(
        http_addr,
        http_router(ctx.clone()),
        http_handle.clone(),
        log.clone(),
        worker.quit_token(),
    );
    spawn_https_listener(
        https_addr,
        https_router(ctx.clone()),
        rustls_config,
        cert_store.clone(),
        https_handle.clone(),
        log.clone(),
        worker.quit_token(),
    );
    spawn_cert_refresh(cert_store, log.clone(), worker.quit_token());

    tokio::time::sleep(Duration::from_millis(100)).await;
    log.debug("Portal HTTP initialization completed", &[]);
    worker.report_init_completed();

    worker.cancelled().await;
    log.debug("Terminating Portal HTTP...", &[]);
    http_handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
    https_handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
    log.debug("Portal HTTP termination completed", &[]);
    worker.report_quit_completed();
}

fn spawn_http_listener(
    addr: SocketAddr,
    router: Router,
    handle: axum_server::Handle,
    log: Arc<dyn LogSink>,
    quit: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let result = axum_server::bind(addr)
                .handle(handle.clone())
                .serve(router.clone().into_make_service_with_connect_info::<SocketAddr>())
                .await;

            if let Err(e) = result {
                log.error("Failed to run HTTP server", &[("err", &e.to_string())]);
            }
            if quit.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}

fn spawn_https_listener(
    addr: SocketAddr,
    router: Router,
    rustls_config: RustlsConfig,
    cert_store: Arc<CertificateStore>,
    handle: axum_server::Handle,
    log: Arc<dyn LogSink>,
    quit: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            match cert_store.load() {
                Ok(()) => {
                    let result = axum_server::bind_rustls(addr, rustls_config.clone())
                        .handle(handle.clone())
                        .serve(
                            router
                                .clone()
                                .into_make_service_with_connect_info::<SocketAddr>(),
                        )
                        .await;

                    if let Err(e) = result {
                        log.error("Failed to run HTTPS server", &[("err", &e.to_string())]);
                    }
                }
                Err(e) => {
                    log.error(
                        "Failed to load TLS certificate",
                        &[("err", &e.to_string())],
                    );
                }
            }

            if quit.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
}

fn spawn_cert_refresh(
    cert_store: Arc<CertificateStore>,
    log: Arc<dyn LogSink>,
    quit: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = quit.cancelled() => break,
                _ = tokio::time::sleep(CERT_REFRESH_INTERVAL) => {
                    if let Err(e) = cert_store.load() {
                        log.error(
                            "Failed to reload TLS certificate",
                            &[("err", &e.to_string())],
                        );
                    }
                }
            }
        }
    });
}
