use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swanportal_adapters::{
    DirectoryClient, EmailSender, FsObjectStore, LogSink, ObjectStore, ScimHttpClient, SpoolMailer,
    TracingLogSink,
};
use swanportal_config::{AppSettings, DEFAULT_SETTINGS_PATH};
use swanportal_creds::CredentialStore;
use swanportal_identity::IdentityResolver;
use swanportal_server::tracker::IdleConntrackFeed;
use swanportal_server::{ipsec, portal, radius, tracker, AppState, Supervisor};

#[derive(Parser, Debug)]
#[command(
    name = "swanportal",
    version,
    about = "Self-service VPN credential portal and RADIUS back-end"
)]
struct Args {
    /// Settings file path (JSON)
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,
    /// Instance-specific settings overlay merged over the base file
    #[arg(long)]
    site_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut paths = vec![args.config];
    if let Some(site_config) = args.site_config {
        paths.push(site_config);
    }
    let settings = AppSettings::load(&paths)?;
    settings.validate()?;

    let level = settings.logging.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let log: Arc<dyn LogSink> = Arc::new(TracingLogSink);

    std::fs::create_dir_all(&settings.credentials.object_root)?;
    std::fs::create_dir_all(&settings.email.spool_dir)?;

    let objects: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(&settings.credentials.object_root));
    let credentials = Arc::new(CredentialStore::new(
        objects,
        settings.credentials.key_ring()?,
        log.clone(),
        settings.credentials.bucket_name.clone(),
    ));

    let directory: Arc<dyn DirectoryClient> = Arc::new(ScimHttpClient::new(
        &settings.identity.directory_url,
        &settings.identity.directory_token,
    ));
    let identity = Arc::new(IdentityResolver::new(
        directory,
        log.clone(),
        settings.identity.class_pattern()?,
    ));

    let mailer: Arc<dyn EmailSender> = Arc::new(SpoolMailer::new(
        &settings.email.spool_dir,
        settings.email.source.clone(),
    ));

    info!(
        directory = %settings.identity.directory_url,
        bucket = %settings.credentials.bucket_name,
        https = %settings.server.https_listen,
        radius = %settings.server.radius_listen,
        pid = std::process::id(),
        "starting up"
    );

    let app = Arc::new(AppState::new(settings, log, identity, credentials, mailer));
    let supervisor = Supervisor::new();

    tokio::spawn(ipsec::run(app.clone(), supervisor.register()));
    tokio::spawn(tracker::run(
        app.clone(),
        supervisor.register(),
        Arc::new(IdleConntrackFeed),
    ));
    tokio::spawn(radius::run(app.clone(), supervisor.register()));
    tokio::spawn(portal::run(app.clone(), supervisor.register()));

    supervisor.wait_init().await;
    info!("started up successfully");

    shutdown_signal_handler().await;
    info!("shutting down");
    supervisor.quit();
    supervisor.wait_quit().await;
    info!("shut down successfully");

    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
