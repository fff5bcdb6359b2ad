//! Per-user VPN credential store.
//!
//! Credentials are NT-hashes keyed by the public IP a user last
//! authenticated from, persisted as envelope-encrypted JSON objects and
//! read through a short-lived in-process cache. Retention is bounded both
//! in time (15 days since last use) and in cardinality (4 IPs per user).

mod nthash;
mod store;

pub use nthash::nt_hash;
pub use store::{object_key, CredentialStore, UserCredentials};
