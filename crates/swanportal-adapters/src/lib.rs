//! Capability traits for the portal's external collaborators.
//!
//! The core never talks to an object store, a user directory, an email
//! transport, or a log destination directly; it holds trait objects defined
//! here. Production wiring picks concrete implementations at startup, tests
//! substitute the in-memory doubles.

mod directory;
mod email;
mod log;
mod object;

pub use directory::{
    DirectoryClient, DirectoryError, DirectoryGroup, DirectoryUser, EmailEntry, ExternalId,
    MemoryDirectory, ScimHttpClient,
};
pub use email::{EmailAttachment, EmailError, EmailSender, MemoryMailer, SentEmail, SpoolMailer};
pub use log::{LogRecord, LogSink, MemoryLogSink, TracingLogSink};
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError};

/// Immutable view of an authenticated directory principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnUser {
    /// Normalized (lowercase) login name.
    pub username: String,
    /// Address self-service mail is delivered to.
    pub email: String,
    /// RADIUS reply class derived from group memberships; `"null"` when no
    /// group matched.
    pub class: String,
}
