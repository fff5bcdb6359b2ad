//! Self-service token codec.
//!
//! Tokens are JSON payloads sealed in the authenticated envelope under a
//! process-local key and carried as unpadded base64url text. The key is
//! generated at startup, so tokens cannot outlive the process. Redeemed
//! token text is remembered slightly longer than the envelope TTL, which
//! is what makes redemption one-shot.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use swanportal_cache::TtlCache;
use swanportal_envelope::{EnvelopeError, KeyRing};

/// Envelope TTL applied when redeeming a web access token.
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
/// How long redeemed token text is remembered; outlives [`TOKEN_TTL`] so
/// a replay can never be re-verified.
pub const USED_TOKEN_TTL: Duration = Duration::from_secs(61 * 60);

/// Self-service token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebAccessToken {
    pub username: String,
    pub ip_address: String,
}

/// Token failure.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("not base64url")]
    Decode,
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Issues and redeems process-local tokens.
pub struct TokenService {
    keys: KeyRing,
    used: TtlCache<String, bool>,
}

impl TokenService {
    /// Create a service around a fresh ephemeral key.
    pub fn new() -> Self {
        Self {
            keys: KeyRing::ephemeral(),
            used: TtlCache::new(USED_TOKEN_TTL),
        }
    }

    /// Serialize and seal a payload into token text.
    pub fn issue<T: Serialize>(&self, payload: &T) -> Result<String, TokenError> {
        let encoded = serde_json::to_vec(payload)?;
        Ok(URL_SAFE_NO_PAD.encode(self.keys.seal(&encoded)))
    }

    /// Open token text and decode the payload, enforcing `ttl`.
    pub fn redeem<T: DeserializeOwned>(&self, text: &str, ttl: Duration) -> Result<T, TokenError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(|_| TokenError::Decode)?;
        let cleartext = self.keys.open(&sealed, ttl)?;
        Ok(serde_json::from_slice(&cleartext)?)
    }

    /// Atomically mark token text as used.
    ///
    /// Returns `false` when the text was already marked within
    /// [`USED_TOKEN_TTL`]. Called before envelope verification so a
    /// replayed token is rejected without touching key material.
    pub fn mark_used(&self, text: &str) -> bool {
        self.used.insert_if_absent(text.to_string(), true, USED_TOKEN_TTL)
    }
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_redeem_roundtrip() {
        let tokens = TokenService::new();
        let payload = WebAccessToken {
            username: "alice@example.com".into(),
            ip_address: "203.0.113.7".into(),
        };

        let text = tokens.issue(&payload).unwrap();
        let redeemed: WebAccessToken = tokens.redeem(&text, TOKEN_TTL).unwrap();
        assert_eq!(redeemed, payload);
    }

    #[test]
    fn test_token_text_is_urlsafe() {
        let tokens = TokenService::new();
        let text = tokens
            .issue(&WebAccessToken {
                username: "alice".into(),
                ip_address: "203.0.113.7".into(),
            })
            .unwrap();
        assert!(text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let tokens = TokenService::new();
        let mut text = tokens
            .issue(&WebAccessToken {
                username: "alice".into(),
                ip_address: "203.0.113.7".into(),
            })
            .unwrap();
        text.replace_range(..4, "AAAA");
        assert!(tokens.redeem::<WebAccessToken>(&text, TOKEN_TTL).is_err());
    }

    #[test]
    fn test_tokens_do_not_cross_services() {
        // A restart means a fresh key; old tokens must die with it.
        let old = TokenService::new();
        let new = TokenService::new();
        let text = old
            .issue(&WebAccessToken {
                username: "alice".into(),
                ip_address: "203.0.113.7".into(),
            })
            .unwrap();
        assert!(new.redeem::<WebAccessToken>(&text, TOKEN_TTL).is_err());
    }

    #[test]
    fn test_mark_used_is_one_shot() {
        let tokens = TokenService::new();
        assert!(tokens.mark_used("token-text"));
        assert!(!tokens.mark_used("token-text"));
        assert!(tokens.mark_used("other-text"));
    }
}
