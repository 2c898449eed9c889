//! The `spclient` HTTPS API: metadata lookup, storage resolve, and
//! connect-state push, all bearer/client-token authenticated.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use prost::Message;

use crate::error::{Error, Result};
use crate::metadata::PlayableId;
use crate::proto::{
    ClientDataRequest, ClientTokenRequest, ClientTokenResponse, ConnectivitySdkData, Episode,
    StorageResolveResponse, Track,
};
use crate::session::Session;

use super::token::TokenProvider;

const CLIENT_TOKEN_URL: &str = "https://clienttoken.spotify.com/v1/clienttoken";
/// Spotify's public desktop client id, used for client-token issuance.
const CLIENT_ID: &str = "65b708073fc0480ea92a077233ca87bd";
const CLIENT_VERSION: &str = "1.0.0";

static HTTP: Lazy<reqwest::blocking::Client> = Lazy::new(reqwest::blocking::Client::new);

/// A metadata record for either a track or an episode, depending on the
/// requested kind.
#[derive(Debug, Clone)]
pub enum Metadata {
    Track(Track),
    Episode(Episode),
}

/// HTTPS client for the `spclient` endpoints: metadata, storage resolve,
/// and connect-state push. Owns the client-token cache; the bearer token
/// itself is cached by [`TokenProvider`].
pub struct ApiClient {
    token: TokenProvider,
    client_token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new() -> ApiClient {
        ApiClient {
            token: TokenProvider::new(),
            client_token: Mutex::new(None),
        }
    }

    fn fetch_client_token(&self, session: &Session) -> Result<String> {
        let request = ClientTokenRequest {
            request_type: 0,
            client_data: ClientDataRequest {
                client_id: CLIENT_ID.to_string(),
                client_version: CLIENT_VERSION.to_string(),
                connectivity_sdk_data: Some(ConnectivitySdkData {
                    device_id: Some(session.device_id().to_string()),
                }),
            },
        };

        let response = HTTP
            .post(CLIENT_TOKEN_URL)
            .header("Content-Type", "application/x-protobuf")
            .body(request.encode_to_vec())
            .send()?
            .error_for_status()?;
        let bytes = response.bytes()?;
        let parsed = ClientTokenResponse::decode(bytes.as_ref())
            .map_err(|e| Error::Crypto(format!("malformed client token response: {e}")))?;
        let token = parsed
            .granted_token
            .ok_or_else(|| Error::FeederError("client token request was not granted".to_string()))?
            .token;
        Ok(token)
    }

    fn client_token(&self, session: &Session) -> Result<String> {
        {
            let cached = self.client_token.lock().unwrap();
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }
        let token = self.fetch_client_token(session)?;
        *self.client_token.lock().unwrap() = Some(token.clone());
        Ok(token)
    }

    fn request(
        &self,
        session: &Session,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::blocking::RequestBuilder> {
        let host = session.resolver().random("spclient")?;
        let bearer = self.token.get_token(session)?;
        let client_token = self.client_token(session)?;
        Ok(HTTP
            .request(method, format!("https://{host}{path}"))
            .bearer_auth(bearer)
            .header("client-token", client_token))
    }

    /// `GET /metadata/4/{track,episode}/{hex_id}`.
    pub fn metadata_for(&self, session: &Session, id: &PlayableId) -> Result<Metadata> {
        let path = format!("/metadata/4/{}/{}", id.kind(), id.hex_id());
        let response = self
            .request(session, reqwest::Method::GET, &path)?
            .send()?;
        if !response.status().is_success() {
            return Err(Error::StatusCode(response.status().as_u16()));
        }
        let bytes = response.bytes()?;
        match id {
            PlayableId::Track(_) => Track::decode(bytes.as_ref())
                .map(Metadata::Track)
                .map_err(|e| Error::Crypto(format!("malformed track metadata: {e}"))),
            PlayableId::Episode(_) => Episode::decode(bytes.as_ref())
                .map(Metadata::Episode)
                .map_err(|e| Error::Crypto(format!("malformed episode metadata: {e}"))),
            PlayableId::Unsupported { kind, .. } => {
                Err(Error::FeederError(format!("cannot fetch metadata for {kind}")))
            }
        }
    }

    /// `GET /storage-resolve/files/audio/{interactive,interactive_prefetch}/{hex_file_id}`.
    pub fn storage_resolve(
        &self,
        session: &Session,
        file_id_hex: &str,
        prefetch: bool,
    ) -> Result<StorageResolveResponse> {
        let variant = if prefetch { "interactive_prefetch" } else { "interactive" };
        let path = format!("/storage-resolve/files/audio/{variant}/{file_id_hex}");
        let response = self
            .request(session, reqwest::Method::GET, &path)?
            .send()?;
        if !response.status().is_success() {
            return Err(Error::StatusCode(response.status().as_u16()));
        }
        let bytes = response.bytes()?;
        StorageResolveResponse::decode(bytes.as_ref())
            .map_err(|e| Error::Crypto(format!("malformed storage resolve response: {e}")))
    }

    /// `PUT /connect-state/v1/devices/{device_id}`. Behaviorally out of
    /// scope (no Dealer state machine) — performs only the PUT.
    pub fn put_connect_state(&self, session: &Session, device_id: &str, state: Vec<u8>) -> Result<()> {
        let path = format!("/connect-state/v1/devices/{device_id}");
        let response = self
            .request(session, reqwest::Method::PUT, &path)?
            .header("Content-Type", "application/x-protobuf")
            .body(state)
            .send()?;
        if !response.status().is_success() {
            return Err(Error::StatusCode(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        ApiClient::new()
    }
}
