//! CDN chunk fetch: URL selection, ranged HTTP requests, and AES-CTR
//! decryption of the returned bytes, grounded on `CdnManager.py`'s
//! URL-expiry parsing and a blocking ranged-GET download style.

use once_cell::sync::Lazy;
use rand::seq::IteratorRandom;
use tracing::{debug, warn};

use crate::crypto::audio_cipher;
use crate::error::{Error, Result};

/// Chunk size the whole pipeline aligns to: 128 KiB.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// CDN hosts known to reject non-Facebook-app clients; skipped when
/// picking a URL at random.
const EXCLUDED_SUBSTRINGS: [&str; 2] = ["audio4-gm-fb", "audio-gm-fb"];

static HTTP: Lazy<reqwest::blocking::Client> = Lazy::new(reqwest::blocking::Client::new);

/// Pick a CDN URL uniformly at random, skipping known-bad hosts.
pub fn pick_url(urls: &[String]) -> Result<&str> {
    urls.iter()
        .filter(|u| !EXCLUDED_SUBSTRINGS.iter().any(|bad| u.contains(bad)))
        .choose(&mut rand::thread_rng())
        .map(String::as_str)
        .ok_or_else(|| Error::FeederError("no usable CDN url".to_string()))
}

/// Parse a URL's expiration time, checked in order: the `__token__`
/// parameter's embedded `exp=<unix>`, a top-level `Expires=<unix>` query
/// parameter, or a leading `<epoch>_` path-segment prefix. `None` if none
/// apply (treated as non-expiring).
pub fn parse_expiry(url: &str) -> Option<u64> {
    if let Some(token_start) = url.find("__token__=") {
        let token = &url[token_start + "__token__=".len()..];
        let token = token.split('&').next().unwrap_or(token);
        if let Some(exp_start) = token.find("exp=") {
            let exp = &token[exp_start + "exp=".len()..];
            let exp = exp.split(['~', '&']).next().unwrap_or(exp);
            if let Ok(value) = exp.parse() {
                return Some(value);
            }
        }
    }

    if let Some(expires_start) = url.find("Expires=") {
        let expires = &url[expires_start + "Expires=".len()..];
        let expires = expires.split('&').next().unwrap_or(expires);
        if let Ok(value) = expires.parse() {
            return Some(value);
        }
    }

    let last_segment = url.rsplit('/').next().unwrap_or("");
    if let Some((prefix, _)) = last_segment.split_once('_') {
        if let Ok(value) = prefix.parse() {
            return Some(value);
        }
    }

    None
}

/// One resolved audio file's CDN access: the candidate URLs and the key
/// to decrypt it with (`None` for external-episode passthrough, which
/// streams the publisher's already-unencrypted file as-is).
pub struct CdnFile {
    urls: Vec<String>,
    key: Option<[u8; 16]>,
}

fn range_header(start: u64, end_inclusive: u64) -> String {
    format!("bytes={start}-{end_inclusive}")
}

fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.parse().ok()
}

impl CdnFile {
    pub fn new(urls: Vec<String>, key: Option<[u8; 16]>) -> CdnFile {
        CdnFile { urls, key }
    }

    fn get_range(&self, url: &str, start: u64, end_inclusive: u64) -> Result<(Vec<u8>, u64)> {
        let response = HTTP
            .get(url)
            .header("Range", range_header(start, end_inclusive))
            .send()?;
        if response.status().as_u16() != 206 {
            return Err(Error::StatusCode(response.status().as_u16()));
        }
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| Error::FeederError("missing Content-Range in CDN response".to_string()))?;
        let bytes = response.bytes()?.to_vec();
        Ok((bytes, total))
    }

    /// Fetch and decrypt chunk 0, also returning the file's total size.
    pub fn probe(&self) -> Result<(Vec<u8>, u64)> {
        let url = pick_url(&self.urls)?;
        let (ciphertext, total) = self.get_range(url, 0, CHUNK_SIZE as u64 - 1)?;
        let plaintext = self.decrypt(0, &ciphertext);
        debug!(total, "probed CDN file size");
        Ok((plaintext, total))
    }

    /// Fetch and decrypt chunk `index`, given the file's known total size.
    pub fn fetch_chunk(&self, index: u64, total_size: u64) -> Result<Vec<u8>> {
        let start = index * CHUNK_SIZE as u64;
        let end = (start + CHUNK_SIZE as u64 - 1).min(total_size.saturating_sub(1));
        let url = pick_url(&self.urls)?;
        let (ciphertext, reported_total) = self.get_range(url, start, end)?;
        if reported_total != total_size {
            warn!(reported_total, total_size, "CDN reported a different total size mid-stream");
        }
        Ok(self.decrypt(index, &ciphertext))
    }

    fn decrypt(&self, chunk_index: u64, ciphertext: &[u8]) -> Vec<u8> {
        match &self.key {
            Some(key) => audio_cipher::decrypt_chunk(key, chunk_index, ciphertext)
                .unwrap_or_else(|_| ciphertext.to_vec()),
            // External episodes: identity decrypt, raw MP3 passthrough.
            None => ciphertext.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_known_bad_hosts() {
        let urls = vec![
            "https://audio4-gm-fb.example.com/x".to_string(),
            "https://good-cdn.example.com/x".to_string(),
        ];
        let picked = pick_url(&urls).unwrap();
        assert_eq!(picked, "https://good-cdn.example.com/x");
    }

    #[test]
    fn errors_when_all_urls_excluded() {
        let urls = vec!["https://audio-gm-fb.example.com/x".to_string()];
        assert!(pick_url(&urls).is_err());
    }

    #[test]
    fn parses_expiry_from_dunder_token() {
        let url = "https://cdn.example.com/x?__token__=exp=1700000000~acl=/*";
        assert_eq!(parse_expiry(url), Some(1_700_000_000));
    }

    #[test]
    fn parses_expiry_from_expires_param() {
        let url = "https://cdn.example.com/x?Expires=1700000001&Signature=abc";
        assert_eq!(parse_expiry(url), Some(1_700_000_001));
    }

    #[test]
    fn parses_expiry_from_leading_epoch_segment() {
        let url = "https://cdn.example.com/audio/1700000002_abcidhash";
        assert_eq!(parse_expiry(url), Some(1_700_000_002));
    }

    #[test]
    fn no_expiry_markers_returns_none() {
        let url = "https://cdn.example.com/audio/plainfile";
        assert_eq!(parse_expiry(url), None);
    }

    #[test]
    fn content_range_total_parses_last_segment() {
        assert_eq!(parse_content_range_total("bytes 0-131071/9999"), Some(9999));
    }
}
