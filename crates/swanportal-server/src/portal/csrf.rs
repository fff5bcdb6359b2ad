//! CSRF defense.
//!
//! Every response carries a fresh CSRF value, both in the rendered form
//! and as an HTTP-only cookie. Mutating requests must echo the same value
//! through both channels, the envelope must verify, and the embedded IP
//! must match the requester.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::token::TokenService;

/// Cookie carrying the CSRF value.
pub const CSRF_COOKIE: &str = "csrf";
/// CSRF cookie lifetime.
pub const CSRF_COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;
/// Envelope TTL applied when verifying a submitted CSRF value.
const CSRF_TTL: Duration = Duration::from_secs(59 * 60);
/// Nonce length inside the CSRF token.
const NONCE_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct CsrfToken {
    nonce: Vec<u8>,
    ip_address: String,
}

/// Why a submission was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,
    #[error("CSRF token invalid")]
    Invalid,
    #[error("CSRF token mismatch")]
    CookieMismatch,
    #[error("IP mismatch")]
    IpMismatch,
}

/// Mint a CSRF value bound to `client_ip`.
pub fn mint(tokens: &TokenService, client_ip: &str) -> Option<String> {
    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    tokens
        .issue(&CsrfToken {
            nonce,
            ip_address: client_ip.to_string(),
        })
        .ok()
}

/// Verify a mutating request's CSRF evidence.
///
/// Checks, in order: the form value verifies within the TTL, the cookie
/// is present and equals the form value byte for byte, and the embedded
/// IP equals the requester's.
pub fn verify(
    tokens: &TokenService,
    form_value: Option<&str>,
    cookie_value: Option<&str>,
    client_ip: &str,
) -> Result<(), CsrfError> {
    let form_value = form_value.ok_or(CsrfError::Missing)?;

    let token: CsrfToken = tokens
        .redeem(form_value, CSRF_TTL)
        .map_err(|_| CsrfError::Invalid)?;

    let cookie_value = cookie_value.ok_or(CsrfError::Missing)?;
    if cookie_value != form_value {
        return Err(CsrfError::CookieMismatch);
    }

    if token.ip_address != client_ip {
        return Err(CsrfError::IpMismatch);
    }

    Ok(())
}
