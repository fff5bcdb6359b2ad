//! Portal server library.
//!
//! Exposes the worker implementations and shared state for integration
//! tests and embedding.

pub mod error;
pub mod ipsec;
pub mod portal;
pub mod radius;
pub mod sessions;
pub mod state;
pub mod supervisor;
pub mod tracker;

pub use error::ServerError;
pub use state::AppState;
pub use supervisor::{Supervisor, WorkerHandle};
pub use tokio_util::sync::CancellationToken;
