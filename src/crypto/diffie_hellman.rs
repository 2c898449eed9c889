//! Diffie-Hellman key exchange over Spotify's fixed 768-bit group.

use num_bigint::BigUint;
use rand::RngCore;

/// RFC 2409 MODP group 1 prime, the group Spotify's access points use.
const PRIME_BYTES: [u8; 96] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x3A, 0x36, 0x20, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

const GENERATOR: u32 = 2;
const PRIVATE_KEY_BYTES: usize = 95;

/// A Diffie-Hellman keypair for one handshake.
pub struct DiffieHellman {
    prime: BigUint,
    private_key: BigUint,
    public_key: BigUint,
}

impl DiffieHellman {
    /// Generate a fresh 95-byte random private exponent and derive the
    /// corresponding public key.
    pub fn random() -> DiffieHellman {
        let mut key_data = [0u8; PRIVATE_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key_data);
        DiffieHellman::from_private_bytes(&key_data)
    }

    /// Build a keypair from an explicit private exponent. Exposed for
    /// deterministic tests; real handshakes use [`DiffieHellman::random`].
    pub fn from_private_bytes(private_key: &[u8]) -> DiffieHellman {
        let prime = BigUint::from_bytes_be(&PRIME_BYTES);
        let private_key = BigUint::from_bytes_be(private_key);
        let public_key = BigUint::from(GENERATOR).modpow(&private_key, &prime);
        DiffieHellman {
            prime,
            private_key,
            public_key,
        }
    }

    /// This side's public key, big-endian, left-trimmed (no leading zero
    /// bytes — `BigUint::to_bytes_be` already omits them).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes_be()
    }

    /// Combine the peer's public key with our private exponent.
    pub fn shared_secret(&self, remote_key_bytes: &[u8]) -> Vec<u8> {
        let remote = BigUint::from_bytes_be(remote_key_bytes);
        remote.modpow(&self.private_key, &self.prime).to_bytes_be()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_one_yields_generator() {
        let dh = DiffieHellman::from_private_bytes(&[1]);
        assert_eq!(dh.public_key_bytes(), vec![2]);
    }

    #[test]
    fn shared_secret_matches_modpow() {
        let dh = DiffieHellman::from_private_bytes(&[5]);
        // peer public key = 2 (i.e. g^1), so shared = 2^5 mod p = 32
        let shared = dh.shared_secret(&[2]);
        assert_eq!(shared, vec![32]);
    }

    #[test]
    fn random_keys_produce_matching_shared_secret() {
        let a = DiffieHellman::random();
        let b = DiffieHellman::random();
        let shared_a = a.shared_secret(&b.public_key_bytes());
        let shared_b = b.shared_secret(&a.public_key_bytes());
        assert_eq!(shared_a, shared_b);
    }
}
