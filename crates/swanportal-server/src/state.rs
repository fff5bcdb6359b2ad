//! Shared application state.
//!
//! All four workers share one `Arc<AppState>`; workers own nothing of
//! each other beyond this.

use std::sync::Arc;

use swanportal_adapters::{EmailSender, LogSink};
use swanportal_config::AppSettings;
use swanportal_creds::CredentialStore;
use swanportal_identity::IdentityResolver;

use crate::portal::token::TokenService;
use crate::sessions::SessionMap;

/// State shared by every worker.
pub struct AppState {
    pub settings: AppSettings,
    pub log: Arc<dyn LogSink>,
    pub identity: Arc<IdentityResolver>,
    pub credentials: Arc<CredentialStore>,
    pub mailer: Arc<dyn EmailSender>,
    /// Process-local token service; tokens and CSRF values do not
    /// survive a restart.
    pub tokens: TokenService,
    pub sessions: SessionMap,
}

impl AppState {
    /// Assemble the shared state from its collaborators.
    pub fn new(
        settings: AppSettings,
        log: Arc<dyn LogSink>,
        identity: Arc<IdentityResolver>,
        credentials: Arc<CredentialStore>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            settings,
            log,
            identity,
            credentials,
            mailer,
            tokens: TokenService::new(),
            sessions: SessionMap::new(),
        }
    }
}
