//! Cryptographic primitives: key material, the CTR body cipher and the
//! deterministic name codec.

pub mod names;
pub mod stream;

use crate::error::{Error, Result};
use rand::RngCore;
use zeroize::Zeroizing;

/// Key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// The single symmetric key that parameterizes both the body stream cipher
/// and the name codec. Never persisted; zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SecretKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        SecretKey {
            key: Zeroizing::new(bytes),
        }
    }

    /// Parse a hex-encoded key. The string must be valid hex of even length
    /// decoding to exactly 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|_| Error::InvalidArgument(format!("malformed hex key: {}", s)))?;

        if raw.len() != KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                raw.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&raw);
        Ok(SecretKey { key })
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut());
        SecretKey { key }
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.write_str("SecretKey(..)")
    }
}

/// Generate `length` random bytes as a lowercase hex string (keygen).
pub fn random_hex(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex_roundtrip() {
        let key = SecretKey::generate();
        let encoded = hex::encode(key.as_bytes());
        let parsed = SecretKey::from_hex(&encoded).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(SecretKey::from_hex("zz").is_err());
        assert!(SecretKey::from_hex("abc").is_err());
        // Right syntax, wrong length
        assert!(SecretKey::from_hex("deadbeef").is_err());
    }

    #[test]
    fn test_random_hex_length() {
        let s = random_hex(32);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(s, s.to_lowercase());
    }

    #[test]
    fn test_keys_are_distinct() {
        let a = SecretKey::generate();
        let b = SecretKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
