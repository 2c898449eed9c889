//! Session and player configuration, and persisted login credentials.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::metadata::Quality;

/// Identity the client advertises during login and device-state calls.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stable identifier for this device installation.
    pub device_id: String,
    /// Human-readable device name shown in Spotify Connect.
    pub device_name: String,
    /// Device type string (e.g. `"computer"`).
    pub device_type: String,
    /// Two-letter locale sent as `preferred_locale` after welcome.
    pub preferred_locale: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device_id: uuid::Uuid::new_v4().simple().to_string(),
            device_name: "spotclient".to_string(),
            device_type: "computer".to_string(),
            preferred_locale: "en".to_string(),
        }
    }
}

/// Player-facing configuration; surfaces every key in the external
/// configuration table, including ones this client does not implement.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Preferred audio quality tier.
    pub preferred_quality: Quality,
    /// Whether to retry chunk fetches beyond the preload threshold.
    pub retry_on_chunk_error: bool,
    /// On-disk chunk cache toggle. Not implemented; enabling it causes
    /// [`crate::error::Error::Unsupported`] at stream-open time.
    pub cache_enabled: bool,
    /// Directory for the on-disk cache, if ever enabled.
    pub cache_dir: Option<PathBuf>,
    /// Persist a reusable login credential on successful auth.
    pub store_credentials: bool,
    /// Where to persist it.
    pub stored_credentials_file: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            preferred_quality: Quality::HIGH,
            retry_on_chunk_error: true,
            cache_enabled: false,
            cache_dir: None,
            store_credentials: false,
            stored_credentials_file: None,
        }
    }
}

/// Login credentials: a username/password pair, or a previously persisted
/// reusable blob returned by the access point on an earlier login.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Plain username/password, sent as `AUTHENTICATION_USER_PASS`.
    UserPass {
        /// Spotify account username.
        username: String,
        /// Account password.
        password: String,
    },
    /// A reusable blob handed back by a previous successful login.
    Stored(StoredCredentials),
}

/// On-disk representation of a reusable login credential, matching the
/// persisted-state JSON shape: `{username, type, credentials}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Username the blob was issued for.
    pub username: String,
    /// Authentication type string, e.g. `"AUTHENTICATION_STORED_SPOTIFY_CREDENTIALS"`.
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Base64-encoded opaque reusable credential.
    pub credentials: String,
}

impl StoredCredentials {
    /// Load persisted credentials from a JSON file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<StoredCredentials> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Persist this credential as JSON.
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
