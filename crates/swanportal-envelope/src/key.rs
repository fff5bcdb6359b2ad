//! Envelope key material.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::EnvelopeError;

/// Length of a raw envelope key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// A single 256-bit envelope key.
#[derive(Clone)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a key from unpadded base64url.
    pub fn from_base64(text: &str) -> Result<Self, EnvelopeError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|_| EnvelopeError::InvalidKey("key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Encode the key as unpadded base64url.
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

// Key material must not leak through debug output.
impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let key = Key::generate();
        let decoded = Key::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_slice(), decoded.as_slice());
    }

    #[test]
    fn test_padded_input_accepted() {
        let key = Key::generate();
        let padded = format!("{}=", key.to_base64());
        let decoded = Key::from_base64(&padded).unwrap();
        assert_eq!(key.as_slice(), decoded.as_slice());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 16]);
        assert!(Key::from_base64(&short).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = Key::generate();
        assert_eq!(format!("{key:?}"), "Key(..)");
    }
}
