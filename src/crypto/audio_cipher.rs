//! AES-128-CTR decryption of CDN-delivered audio chunks.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::error::{Error, Result};

/// Fixed IV Spotify uses for every file, interpreted as a big-endian
/// 128-bit integer and advanced as a CTR counter.
pub const AUDIO_AES_IV: [u8; 16] = [
    0x72, 0xe0, 0x67, 0xfb, 0xdd, 0xcb, 0xcf, 0x77, 0xeb, 0xe8, 0xbc, 0x64, 0x3f, 0x63, 0x0d, 0x93,
];

/// Counter units per 128 KiB chunk: `128*1024 / 16`.
pub const COUNTER_PER_CHUNK: u128 = 8192;

/// Counter step applied every 4096 plaintext bytes within a chunk.
const COUNTER_STEP: u128 = 0x100;

fn iv_int() -> u128 {
    u128::from_be_bytes(AUDIO_AES_IV)
}

/// The CTR counter value a chunk's decryption starts at.
pub fn chunk_counter(chunk_index: u64) -> u128 {
    iv_int() + COUNTER_PER_CHUNK * chunk_index as u128
}

/// Decrypt one chunk's ciphertext. The cipher is reinstantiated every
/// 4096 bytes with the counter advanced by `0x100`, matching the
/// reference decoder's behavior exactly (rather than running one
/// continuous CTR stream across the whole chunk).
pub fn decrypt_chunk(key: &[u8], chunk_index: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 16 {
        return Err(Error::Crypto(format!(
            "invalid AES key length: {} (expected 16)",
            key.len()
        )));
    }

    let mut counter = chunk_counter(chunk_index);
    let mut out = Vec::with_capacity(ciphertext.len());

    for block in ciphertext.chunks(4096) {
        let iv = counter.to_be_bytes();
        let mut cipher = Ctr128BE::<Aes128>::new_from_slices(key, &iv)
            .map_err(|e| Error::Crypto(format!("failed to create AES cipher: {e}")))?;
        let mut buf = block.to_vec();
        cipher.apply_keystream(&mut buf);
        out.extend_from_slice(&buf);
        counter += COUNTER_STEP;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_zero_starts_at_iv() {
        assert_eq!(chunk_counter(0), iv_int());
    }

    #[test]
    fn chunk_one_starts_at_iv_plus_8192() {
        assert_eq!(chunk_counter(1), iv_int() + 8192);
    }

    #[test]
    fn decrypt_is_reversible_with_same_key_and_index() {
        let key = [0x11u8; 16];
        let plaintext = vec![0x42u8; 128 * 1024];

        // Encrypt by running the same routine against plaintext (CTR is
        // its own inverse).
        let ciphertext = decrypt_chunk(&key, 3, &plaintext).unwrap();
        let roundtrip = decrypt_chunk(&key, 3, &ciphertext).unwrap();
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn crossing_4kib_boundary_matches_split_decrypt() {
        let key = [0x02u8; 16];
        let ciphertext = vec![0xAAu8; 8192];
        let whole = decrypt_chunk(&key, 0, &ciphertext).unwrap();

        let first = decrypt_chunk(&key, 0, &ciphertext[..4096]).unwrap();
        // second half uses counter advanced by one step, same as
        // continuing the loop in `decrypt_chunk` would.
        let mut counter = chunk_counter(0) + COUNTER_STEP;
        let iv = counter.to_be_bytes();
        let mut cipher = Ctr128BE::<Aes128>::new_from_slices(&key, &iv).unwrap();
        let mut second = ciphertext[4096..].to_vec();
        cipher.apply_keystream(&mut second);
        counter += COUNTER_STEP;
        let _ = counter;

        assert_eq!(&whole[..4096], &first[..]);
        assert_eq!(&whole[4096..], &second[..]);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = decrypt_chunk(&[0u8; 10], 0, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}
