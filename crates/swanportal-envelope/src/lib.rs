//! Authenticated-encryption envelope.
//!
//! An envelope is AES-256-GCM over a timestamped payload:
//!
//! ```text
//! version (1) || nonce (12) || ciphertext( timestamp (8, BE unix secs) || plaintext )
//! ```
//!
//! The version byte is bound as associated data. Opening an envelope checks
//! the embedded timestamp against a caller-supplied TTL; a TTL of zero
//! disables the age check. Keys are held in an ordered ring: index 0 is the
//! active encryption key, every key is tried on open, which is what makes
//! key rotation a config change instead of a migration.

mod key;

pub use key::Key;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key as AesKey, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

/// Envelope format version.
const VERSION: u8 = 0x01;
/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// Tolerated clock skew when checking envelope age.
const MAX_CLOCK_SKEW_SECS: u64 = 60;

/// Envelope failure.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The byte string is not a well-formed envelope.
    #[error("malformed envelope")]
    Malformed,

    /// No key in the ring authenticated the ciphertext.
    #[error("decryption failed")]
    Decrypt,

    /// The envelope authenticated but its timestamp is outside the TTL.
    #[error("envelope expired")]
    Expired,

    /// A key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// An ordered ring of envelope keys.
///
/// Sealing always uses the key at index 0; opening tries every key in
/// order.
#[derive(Clone)]
pub struct KeyRing {
    keys: Vec<Key>,
}

impl KeyRing {
    /// Build a ring from an ordered, non-empty list of keys.
    pub fn new(keys: Vec<Key>) -> Result<Self, EnvelopeError> {
        if keys.is_empty() {
            return Err(EnvelopeError::InvalidKey("empty key ring".into()));
        }
        Ok(Self { keys })
    }

    /// Build a single-key ring around a freshly generated key.
    ///
    /// Used for process-local material such as the web token key: anything
    /// sealed under it is unreadable after restart, by construction.
    pub fn ephemeral() -> Self {
        Self {
            keys: vec![Key::generate()],
        }
    }

    /// Parse a comma-separated list of base64url keys, index 0 active.
    pub fn from_joined(joined: &str) -> Result<Self, EnvelopeError> {
        let keys = joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Key::from_base64)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the ring is empty. Always false for a constructed ring.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seal `plaintext` under the active key with the current timestamp.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        self.seal_at(plaintext, unix_now())
    }

    fn seal_at(&self, plaintext: &[u8], timestamp: u64) -> Vec<u8> {
        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(self.keys[0].as_slice()));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut payload = Vec::with_capacity(8 + plaintext.len());
        payload.extend_from_slice(&timestamp.to_be_bytes());
        payload.extend_from_slice(plaintext);

        // Encryption with a fresh random nonce cannot fail.
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &payload,
                    aad: &[VERSION],
                },
            )
            .expect("AES-GCM encryption");

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Open an envelope, enforcing `ttl` against the embedded timestamp.
    ///
    /// A zero `ttl` skips the age check entirely; the stored-credential
    /// read path relies on this because objects in the store may
    /// legitimately be older than any token lifetime.
    pub fn open(&self, data: &[u8], ttl: Duration) -> Result<Vec<u8>, EnvelopeError> {
        if data.len() < 1 + NONCE_LEN + 16 + 8 || data[0] != VERSION {
            return Err(EnvelopeError::Malformed);
        }
        let nonce = Nonce::from_slice(&data[1..1 + NONCE_LEN]);
        let ciphertext = &data[1 + NONCE_LEN..];

        let payload = self
            .keys
            .iter()
            .find_map(|key| {
                let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key.as_slice()));
                cipher
                    .decrypt(
                        nonce,
                        Payload {
                            msg: ciphertext,
                            aad: &[VERSION],
                        },
                    )
                    .ok()
            })
            .ok_or(EnvelopeError::Decrypt)?;

        if payload.len() < 8 {
            return Err(EnvelopeError::Malformed);
        }
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&payload[..8]);
        let timestamp = u64::from_be_bytes(ts_bytes);

        let now = unix_now();
        if timestamp > now + MAX_CLOCK_SKEW_SECS {
            return Err(EnvelopeError::Expired);
        }
        if !ttl.is_zero() && timestamp + ttl.as_secs() < now {
            return Err(EnvelopeError::Expired);
        }

        Ok(payload[8..].to_vec())
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("keys", &self.keys.len())
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs()
}
