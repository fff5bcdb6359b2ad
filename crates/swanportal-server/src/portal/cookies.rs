//! Minimal cookie plumbing.
//!
//! The portal sets exactly two cookies (`csrf`, `bcp47tag`), both
//! HTTP-only, Secure, path `/`; nothing here aspires to be a general
//! cookie jar.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

/// Value of the first cookie named `name`, if any.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for pair in header.split(';') {
            if let Some((cookie_name, value)) = pair.trim().split_once('=') {
                if cookie_name == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Build a `Set-Cookie` value.
pub fn set_cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!("{name}={value}; Max-Age={max_age_secs}; Path=/; HttpOnly; Secure")
}
