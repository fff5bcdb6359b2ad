//! Language-tag negotiation.
//!
//! Candidate tags are collected with weights (sticky cookie 1.9, query
//! parameter 2.0 which also refreshes the cookie, `Accept-Language` q
//! values, `en` at 0.1 as the floor) and stable-sorted descending.
//! The template set tries the candidates in order.

use std::sync::OnceLock;

use axum::http::header::ACCEPT_LANGUAGE;
use axum::http::HeaderMap;
use regex::Regex;

use super::cookies::{cookie_value, set_cookie};

/// Cookie remembering the user's explicit language choice.
pub const LANG_COOKIE: &str = "bcp47tag";
/// Sticky cookie lifetime: 30 days.
const LANG_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z](?:-[A-Z][A-Z])?$").expect("tag pattern"))
}

/// Outcome of negotiation.
#[derive(Debug)]
pub struct Negotiated {
    /// Candidate tags, best first.
    pub tags: Vec<String>,
    /// `Set-Cookie` refreshing the sticky tag, when the query parameter
    /// selected one.
    pub set_cookie: Option<String>,
}

/// Collect and order candidate language tags for one request.
pub fn negotiate(headers: &HeaderMap, query_tag: Option<&str>) -> Negotiated {
    // Insertion order is the tie-breaker for equal weights, so the
    // default goes in first.
    let mut weights: Vec<(String, f64)> = vec![("en".to_string(), 0.1)];
    let mut sticky_cookie = None;

    let query_tag = query_tag.filter(|tag| tag_pattern().is_match(tag));
    if let Some(tag) = query_tag {
        raise(&mut weights, tag, 2.0);
        sticky_cookie = Some(set_cookie(LANG_COOKIE, tag, LANG_COOKIE_MAX_AGE_SECS));
    } else if let Some(tag) = cookie_value(headers, LANG_COOKIE) {
        if tag_pattern().is_match(&tag) {
            raise(&mut weights, &tag, 1.9);
        }
    }

    for header in headers.get_all(ACCEPT_LANGUAGE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for part in header.split(',') {
            let mut segments = part.trim().splitn(2, ';');
            let tag = segments.next().unwrap_or("").trim();
            let weight = segments
                .next()
                .and_then(|q| q.trim().strip_prefix("q=").map(str::trim))
                .and_then(|q| q.parse::<f64>().ok())
                .unwrap_or(1.0);

            if tag_pattern().is_match(tag) {
                raise(&mut weights, tag, weight);
            }
        }
    }

    let mut ordered = weights;
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Negotiated {
        tags: ordered.into_iter().map(|(tag, _)| tag).collect(),
        set_cookie: sticky_cookie,
    }
}

/// Record `weight` for `tag`, keeping the highest seen.
fn raise(weights: &mut Vec<(String, f64)>, tag: &str, weight: f64) {
    match weights.iter_mut().find(|(t, _)| t == tag) {
        Some(entry) => entry.1 = entry.1.max(weight),
        None => weights.push((tag.to_string(), weight)),
    }
}
