//! AES-256-CTR body cipher
//!
//! The counter occupies the low 8 bytes of the 16-byte IV: for AES block
//! index c, the IV is the per-file nonce with c added (wrapping, big-endian)
//! into its low half while the high half stays fixed. Any 16-byte-aligned
//! region of the body can therefore be ciphered independently, which is what
//! makes random-access reads and writes possible.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr64BE;

use crate::crypto::SecretKey;

/// AES block size in bytes
pub const AES_BLOCK: usize = 16;

/// Per-file nonce size in bytes
pub const NONCE_SIZE: usize = 16;

type BodyCipher = Ctr64BE<Aes256>;

/// Derive the IV for AES block `counter` of a file with nonce `nonce`.
fn counter_iv(nonce: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut iv = *nonce;
    let low = u64::from_be_bytes(iv[8..16].try_into().unwrap());
    iv[8..16].copy_from_slice(&low.wrapping_add(counter).to_be_bytes());
    iv
}

/// XOR the keystream into `buf`, starting at AES block `counter` of the body.
/// Encryption and decryption are the same operation. `buf` need not be
/// block-aligned in length; it must start on an AES block boundary of the
/// body (the caller's `counter` names that boundary).
pub fn apply_at(key: &SecretKey, nonce: &[u8; NONCE_SIZE], counter: u64, buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    let iv = counter_iv(nonce, counter);
    let mut cipher = BodyCipher::new(key.as_bytes().into(), (&iv).into());
    cipher.apply_keystream(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([0x42u8; 32])
    }

    #[test]
    fn test_apply_is_involutive() {
        let key = test_key();
        let nonce = [7u8; NONCE_SIZE];
        let original = b"some plaintext that spans more than one aes block....".to_vec();

        let mut buf = original.clone();
        apply_at(&key, &nonce, 0, &mut buf);
        assert_ne!(buf, original);
        apply_at(&key, &nonce, 0, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_counter_addresses_block_boundaries() {
        // Ciphering blocks [1..3) directly must equal ciphering [0..3) and
        // discarding the first block.
        let key = test_key();
        let nonce = [0x19u8; NONCE_SIZE];

        let mut whole = vec![0u8; 3 * AES_BLOCK];
        apply_at(&key, &nonce, 0, &mut whole);

        let mut tail = vec![0u8; 2 * AES_BLOCK];
        apply_at(&key, &nonce, 1, &mut tail);

        assert_eq!(&whole[AES_BLOCK..], &tail[..]);
    }

    #[test]
    fn test_counter_wraps_in_low_half() {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&[0xAA; 8]);
        nonce[8..].copy_from_slice(&u64::MAX.to_be_bytes());

        let iv = counter_iv(&nonce, 1);
        // Low half wrapped to zero, high half untouched.
        assert_eq!(&iv[..8], &[0xAA; 8]);
        assert_eq!(&iv[8..], &0u64.to_be_bytes());
    }

    #[test]
    fn test_different_nonces_different_keystream() {
        let key = test_key();
        let mut a = vec![0u8; AES_BLOCK];
        let mut b = vec![0u8; AES_BLOCK];
        apply_at(&key, &[1u8; NONCE_SIZE], 0, &mut a);
        apply_at(&key, &[2u8; NONCE_SIZE], 0, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_partial_block_lengths() {
        let key = test_key();
        let nonce = [3u8; NONCE_SIZE];

        let mut long = vec![0u8; 40];
        apply_at(&key, &nonce, 2, &mut long);

        let mut short = vec![0u8; 21];
        apply_at(&key, &nonce, 2, &mut short);

        assert_eq!(&long[..21], &short[..]);
    }
}
