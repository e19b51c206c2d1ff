//! Deterministic filename encryption
//!
//! Path components are encrypted independently with AES-256-GCM under a fixed
//! all-zero nonce, so the same name always maps to the same token and lookups
//! need no directory index. The token is `tag(16) || ciphertext`, base64
//! encoded with the URL-safe alphabet and no padding. Determinism leaks
//! equality of names across the tree; that tradeoff is accepted for bodies
//! this construction must never be reused.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Path, PathBuf};

use crate::crypto::SecretKey;
use crate::error::{Error, Result};

/// GCM authentication tag size in bytes
const TAG_SIZE: usize = 16;

/// Fixed nonce: name encryption is deliberately deterministic.
const ZERO_NONCE: [u8; 12] = [0u8; 12];

fn cipher_for(key: &SecretKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt one path component into its on-disk token.
pub fn encode_name(key: &SecretKey, name: &str) -> Result<String> {
    let sealed = cipher_for(key)
        .encrypt(Nonce::from_slice(&ZERO_NONCE), name.as_bytes())
        .map_err(|_| Error::Crypto(format!("name encryption failed for {:?}", name)))?;

    // aes-gcm appends the tag; the on-disk token carries it first.
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
    let mut raw = Vec::with_capacity(sealed.len());
    raw.extend_from_slice(tag);
    raw.extend_from_slice(ct);

    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Decrypt one on-disk token back to the plaintext component, verifying the
/// authentication tag.
pub fn decode_name(key: &SecretKey, token: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Error::InvalidName(token.to_string()))?;

    if raw.len() < TAG_SIZE {
        return Err(Error::InvalidName(token.to_string()));
    }

    let (tag, ct) = raw.split_at(TAG_SIZE);
    let mut sealed = Vec::with_capacity(raw.len());
    sealed.extend_from_slice(ct);
    sealed.extend_from_slice(tag);

    let plain = cipher_for(key)
        .decrypt(Nonce::from_slice(&ZERO_NONCE), sealed.as_ref())
        .map_err(|_| Error::InvalidName(token.to_string()))?;

    String::from_utf8(plain).map_err(|_| Error::InvalidName(token.to_string()))
}

/// Map a mount-relative path onto the backing tree: every component is
/// encrypted independently and joined under `base`.
pub fn encrypt_path(key: &SecretKey, base: &Path, relative: &str) -> Result<PathBuf> {
    let mut real = base.to_path_buf();
    for component in relative.split('/').filter(|c| !c.is_empty()) {
        real.push(encode_name(key, component)?);
    }
    Ok(real)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([0x55u8; 32])
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = test_key();
        let name = "my-photo.jpg";

        let token = encode_name(&key, name).unwrap();
        let decoded = decode_name(&key, &token).unwrap();

        assert_eq!(decoded, name);
    }

    #[test]
    fn test_deterministic_encoding() {
        let key = test_key();

        let t1 = encode_name(&key, "report.pdf").unwrap();
        let t2 = encode_name(&key, "report.pdf").unwrap();

        assert_eq!(t1, t2);
    }

    #[test]
    fn test_different_names_different_tokens() {
        let key = test_key();

        let t1 = encode_name(&key, "file_a.txt").unwrap();
        let t2 = encode_name(&key, "file_b.txt").unwrap();

        assert_ne!(t1, t2);
    }

    #[test]
    fn test_token_is_base64_url_no_pad() {
        let key = test_key();
        let token = encode_name(&key, "folder").unwrap();

        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_decode_wrong_key_fails() {
        let token = encode_name(&test_key(), "secret.txt").unwrap();
        let other = SecretKey::from_bytes([0x66u8; 32]);

        assert!(matches!(
            decode_name(&other, &token),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let key = test_key();
        assert!(decode_name(&key, "not base64 !!!").is_err());
        // Valid base64 but shorter than a tag
        assert!(decode_name(&key, "AAAA").is_err());
    }

    #[test]
    fn test_unicode_name() {
        let key = test_key();
        let name = "résumé-2026.pdf";

        let token = encode_name(&key, name).unwrap();
        assert_eq!(decode_name(&key, &token).unwrap(), name);
    }

    #[test]
    fn test_encrypt_path_components() {
        let key = test_key();
        let base = Path::new("/backing");

        let real = encrypt_path(&key, base, "/a/b/c").unwrap();
        let components: Vec<_> = real
            .strip_prefix(base)
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_str().unwrap().to_string())
            .collect();

        assert_eq!(components.len(), 3);
        assert_eq!(decode_name(&key, &components[0]).unwrap(), "a");
        assert_eq!(decode_name(&key, &components[1]).unwrap(), "b");
        assert_eq!(decode_name(&key, &components[2]).unwrap(), "c");
    }

    #[test]
    fn test_encrypt_path_root_is_base() {
        let key = test_key();
        let base = Path::new("/backing");
        assert_eq!(encrypt_path(&key, base, "/").unwrap(), base);
    }
}
