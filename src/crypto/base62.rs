//! Base62 conversion with Spotify's "inverted" alphabet (digits, then
//! lowercase, then uppercase), used to encode/decode 16-byte GIDs to the
//! 22-character ids found in `spotify:` URIs.

const ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const STANDARD_BASE: u32 = 256;
const TARGET_BASE: u32 = 62;

fn lookup(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

/// Base-convert `message` digits (each byte a "digit" in `source_base`)
/// into digits of `target_base`, most-significant first, padded with
/// leading zero digits to `length` if given.
fn convert(message: &[u8], source_base: u32, target_base: u32, length: Option<usize>) -> Vec<u8> {
    let estimated = length.unwrap_or_else(|| {
        let ratio = (source_base as f64).ln() / (target_base as f64).ln();
        (ratio * message.len() as f64).ceil() as usize
    });

    let mut out = Vec::new();
    let mut source = message.to_vec();
    while !source.is_empty() {
        let mut quotient = Vec::new();
        let mut remainder: u32 = 0;
        for &b in &source {
            let accumulator = b as u32 + remainder * source_base;
            let digit = accumulator / target_base;
            remainder = accumulator % target_base;
            if !quotient.is_empty() || digit > 0 {
                quotient.push(digit as u8);
            }
        }
        out.push(remainder as u8);
        source = quotient;
    }

    if out.len() < estimated {
        out.resize(estimated, 0);
    } else if out.len() > estimated {
        out.truncate(estimated);
    }
    out.reverse();
    out
}

/// Encode `message` bytes as base62 text, padded to `length` characters
/// if given (Spotify ids are always fixed-length: 22 chars for a 16-byte
/// GID).
pub fn encode(message: &[u8], length: Option<usize>) -> String {
    let digits = convert(message, STANDARD_BASE, TARGET_BASE, length);
    digits
        .into_iter()
        .map(|d| ALPHABET[d as usize] as char)
        .collect()
}

/// Decode base62 text back to bytes, padded to `length` bytes if given.
pub fn decode(encoded: &str, length: Option<usize>) -> Option<Vec<u8>> {
    let mut digits = Vec::with_capacity(encoded.len());
    for c in encoded.bytes() {
        digits.push(lookup(c)?);
    }
    Some(convert(&digits, TARGET_BASE, STANDARD_BASE, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_fixed_length() {
        let gid = [0xABu8; 16];
        let encoded = encode(&gid, Some(22));
        assert_eq!(encoded.len(), 22);
        let decoded = decode(&encoded, Some(16)).unwrap();
        assert_eq!(decoded, gid);
    }

    #[test]
    fn known_alphabet_order() {
        assert_eq!(encode(&[0], Some(1)), "0");
        assert_eq!(encode(&[61], Some(1)), "Z");
    }

    #[test]
    fn decode_rejects_out_of_alphabet_chars() {
        assert!(decode("!!not base62!!", Some(16)).is_none());
    }
}
