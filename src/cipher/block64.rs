//! Self-contained 64-bit-block keystream cipher
//!
//! Demo backend with the failure modes a dictionary scan has to classify:
//! variable-length keys with Blowfish-like bounds (4..=56 bytes), an 8-byte
//! block size, and padding validation that makes decryption under a wrong
//! key fail as [`CipherError::KeyRejected`] rather than silently producing
//! garbage. Not a real cipher; it exists so the whole pipeline can run and
//! be tested without an external primitive.
//!
//! # Frame layout
//!
//! The encrypted frame is `MAGIC (4 bytes) || plaintext`, padded PKCS#7 to
//! the block size and XORed with a key-derived keystream. On decryption the
//! padding and the magic prefix are both validated; a wrong key fails one
//! of the two with overwhelming probability.

use super::{Cipher, CipherError};

const BLOCK_SIZE: usize = 8;
const MIN_KEY_LEN: usize = 4;
const MAX_KEY_LEN: usize = 56;
const MAGIC: [u8; 4] = *b"KSW1";

/// Demo keystream cipher with 8-byte blocks.
#[derive(Debug, Default)]
pub struct Block64;

impl Block64 {
    pub fn new() -> Self {
        Self
    }

    fn check_key(key: &str) -> Result<u64, CipherError> {
        let bytes = key.as_bytes();
        if bytes.len() < MIN_KEY_LEN || bytes.len() > MAX_KEY_LEN {
            return Err(CipherError::KeyRejected);
        }
        Ok(key_seed(bytes))
    }

    fn apply_keystream(seed: u64, buf: &mut [u8]) {
        for (block_index, block) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            let stream = block_stream(seed, block_index as u64).to_le_bytes();
            for (byte, mask) in block.iter_mut().zip(stream.iter()) {
                *byte ^= mask;
            }
        }
    }
}

impl Cipher for Block64 {
    fn name(&self) -> &'static str {
        "block64"
    }

    fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let seed = Self::check_key(key)?;

        let mut frame = Vec::with_capacity(MAGIC.len() + plaintext.len() + BLOCK_SIZE);
        frame.extend_from_slice(&MAGIC);
        frame.extend_from_slice(plaintext);

        // PKCS#7: always pad, a full block when already aligned.
        let pad = BLOCK_SIZE - (frame.len() % BLOCK_SIZE);
        frame.extend(std::iter::repeat(pad as u8).take(pad));

        Self::apply_keystream(seed, &mut frame);
        Ok(frame)
    }

    fn decrypt(&self, key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let seed = Self::check_key(key)?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::MalformedCiphertext(format!(
                "ciphertext length {} is not a positive multiple of the {}-byte block size",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let mut frame = ciphertext.to_vec();
        Self::apply_keystream(seed, &mut frame);

        let Some(&last) = frame.last() else {
            return Err(CipherError::KeyRejected);
        };
        let pad = last as usize;
        if pad == 0 || pad > BLOCK_SIZE || frame.len() < MAGIC.len() + pad {
            return Err(CipherError::KeyRejected);
        }
        if !frame[frame.len() - pad..].iter().all(|&b| b as usize == pad) {
            return Err(CipherError::KeyRejected);
        }
        if frame[..MAGIC.len()] != MAGIC {
            return Err(CipherError::KeyRejected);
        }

        frame.truncate(frame.len() - pad);
        frame.drain(..MAGIC.len());
        Ok(frame)
    }
}

fn key_seed(key: &[u8]) -> u64 {
    // FNV-1a over the key bytes, then one mixing round.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in key {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(hash)
}

fn block_stream(seed: u64, block_index: u64) -> u64 {
    splitmix64(seed ^ block_index.wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cipher = Block64::new();
        let plaintext = b"attack at dawn, bring every ladder you can find";
        let ciphertext = cipher.encrypt("opensesame", plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);

        let decrypted = cipher.decrypt("opensesame", &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_empty_plaintext() {
        let cipher = Block64::new();
        let ciphertext = cipher.encrypt("opensesame", b"").unwrap();
        let decrypted = cipher.decrypt("opensesame", &ciphertext).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let cipher = Block64::new();
        let ciphertext = cipher.encrypt("rightkey", b"some secret message").unwrap();
        for wrong in ["wrongkey", "hunter22", "password", "rightkex"] {
            assert_eq!(
                cipher.decrypt(wrong, &ciphertext),
                Err(CipherError::KeyRejected),
                "key {:?} should not decrypt",
                wrong
            );
        }
    }

    #[test]
    fn test_key_length_bounds() {
        let cipher = Block64::new();
        assert_eq!(cipher.encrypt("abc", b"msg"), Err(CipherError::KeyRejected));
        let too_long = "x".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            cipher.decrypt(&too_long, &[0u8; 8]),
            Err(CipherError::KeyRejected)
        );
        assert!(cipher.encrypt("abcd", b"msg").is_ok());
    }

    #[test]
    fn test_unaligned_ciphertext_is_malformed() {
        let cipher = Block64::new();
        for len in [1usize, 7, 9, 15] {
            match cipher.decrypt("opensesame", &vec![0u8; len]) {
                Err(CipherError::MalformedCiphertext(_)) => {}
                other => panic!("len {} should be malformed, got {:?}", len, other),
            }
        }
        assert!(matches!(
            cipher.decrypt("opensesame", &[]),
            Err(CipherError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_deterministic_across_instances() {
        let a = Block64::new();
        let b = Block64::new();
        let ct = a.encrypt("sharedkey", b"payload").unwrap();
        assert_eq!(b.decrypt("sharedkey", &ct).unwrap(), b"payload");
    }
}
