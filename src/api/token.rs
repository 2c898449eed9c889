//! Keymaster tokens: OAuth-style access tokens fetched over Mercury and
//! cached until shortly before they expire, grounded on `TokenProvider.py`.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::Result;
use crate::session::Session;

const KEYMASTER_CLIENT_ID: &str = "65b708073fc0480ea92a077233ca87bd";
/// Scopes needed for metadata/CDN/connect-state calls.
const DEFAULT_SCOPES: &str = "streaming,playlist-read,playlist-read-private,user-follow-read,user-library-read";

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    issued_at: u64,
    expires_in: u64,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now > self.issued_at + self.expires_in.saturating_sub(10)
    }
}

/// Fetches and caches a Spotify access token for API calls against
/// `spclient`, requesting a fresh one once the cached one is within 10
/// seconds of expiry.
pub struct TokenProvider {
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new() -> TokenProvider {
        TokenProvider {
            cached: Mutex::new(None),
        }
    }

    /// Get a valid access token, fetching a fresh one over Mercury if the
    /// cached token is missing or within 10 seconds of expiring.
    pub fn get_token(&self, session: &Session) -> Result<String> {
        {
            let cached = self.cached.lock();
            if let Some(token) = cached.as_ref() {
                if !token.is_expired() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let uri = format!(
            "hm://keymaster/token/authenticated?scope={DEFAULT_SCOPES}&client_id={KEYMASTER_CLIENT_ID}&device_id={}",
            session.device_id()
        );
        let response: TokenResponse = session.mercury().get_json(uri)?;
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let access_token = response.access_token.clone();
        *self.cached.lock() = Some(CachedToken {
            access_token: access_token.clone(),
            issued_at,
            expires_in: response.expires_in,
        });
        Ok(access_token)
    }
}

impl Default for TokenProvider {
    fn default() -> Self {
        TokenProvider::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expires_ten_seconds_early() {
        let token = CachedToken {
            access_token: "x".to_string(),
            issued_at: 1_000,
            expires_in: 3600,
        };
        assert!(!token.is_expired());

        let near_expiry = CachedToken {
            access_token: "x".to_string(),
            issued_at: 0,
            expires_in: 1,
        };
        assert!(near_expiry.is_expired());
    }
}
