//! NT-hash computation.

use md4::{Digest, Md4};

/// Compute the NT-hash of a cleartext password.
///
/// The password is re-encoded as little-endian UTF-16 without a BOM,
/// MD4-hashed, and rendered as 32 upper-case hex characters. This is the
/// credential form MS-CHAP-family authenticators consume.
///
/// # Example
/// ```
/// use swanportal_creds::nt_hash;
///
/// assert_eq!(nt_hash("password"), "8846F7EAEE8FB117AD06BDD830B7586C");
/// ```
pub fn nt_hash(password: &str) -> String {
    let utf16le: Vec<u8> = password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();

    let mut hasher = Md4::new();
    hasher.update(&utf16le);
    hex::encode_upper(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(nt_hash("password"), "8846F7EAEE8FB117AD06BDD830B7586C");
        assert_eq!(nt_hash(""), "31D6CFE0D16AE931B73C59D7E0C089C0");
    }

    #[test]
    fn test_shape() {
        let hash = nt_hash("S3cr3t!");
        assert_eq!(hash.len(), 32);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_non_ascii_goes_through_utf16() {
        // Characters outside ASCII must be hashed over their UTF-16 code
        // units, not their UTF-8 bytes.
        assert_ne!(nt_hash("pässword"), nt_hash("password"));
        assert_eq!(nt_hash("пароль").len(), 32);
    }
}
