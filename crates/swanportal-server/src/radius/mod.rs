//! Loopback RADIUS bridge worker.
//!
//! Serves `/radius/?action={authorize|accounting}` for the co-located
//! RADIUS server. The bridge speaks attribute-map JSON; this worker joins
//! identity lookup, credential lookup, and the session table.

pub mod attrs;
mod handlers;
mod logproj;

pub use handlers::router;
pub use logproj::log_radius_exchange;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;
use crate::supervisor::{WorkerHandle, SHUTDOWN_TIMEOUT};

/// Run the RADIUS HTTP worker until shutdown.
pub async fn run(app: Arc<AppState>, worker: WorkerHandle) {
    let log = app.log.clone();

    let addr: SocketAddr = match app.settings.server.radius_listen.parse() {
        Ok(addr) => addr,
        Err(_) => {
            log.error(
                "Invalid RADIUS listen address",
                &[("listen", &app.settings.server.radius_listen)],
            );
            worker.report_init_completed();
            worker.cancelled().await;
            worker.report_quit_completed();
            return;
        }
    };

    let handle = axum_server::Handle::new();
    let router = router(app.clone());

    let serve_handle = handle.clone();
    let serve_log = log.clone();
    let quit = worker.quit_token();
    tokio::spawn(async move {
        loop {
            let result = axum_server::bind(addr)
                .handle(serve_handle.clone())
                .serve(router.clone().into_make_service())
                .await;

            if let Err(e) = result {
                serve_log.error(
                    "Failed to run RADIUS HTTP server",
                    &[("err", &e.to_string())],
                );
            }
            if quit.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    log.debug("RADIUS HTTP initialization completed", &[]);
    worker.report_init_completed();

    worker.cancelled().await;
    log.debug("Terminating RADIUS HTTP...", &[]);
    handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
    log.debug("RADIUS HTTP termination completed", &[]);
    worker.report_quit_completed();
}
