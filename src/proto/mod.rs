//! Hand-declared protobuf message shapes for the handshake, Mercury, and
//! metadata wire formats, derived with `prost` rather than generated by
//! `protoc` — only the fields this client actually reads or writes are
//! declared. Field numbers follow the well-known public layout of
//! Spotify's `keyexchange.proto`/`authentication.proto`/`metadata.proto`.

use prost::Message;

/// `BuildInfo.Platform`; only the platform this client presents.
pub const PLATFORM_LINUX_X86_64: i32 = 4;

#[derive(Clone, PartialEq, Message)]
pub struct BuildInfo {
    #[prost(int32, required, tag = "10", default = "4")]
    pub platform: i32,
    #[prost(int32, required, tag = "20")]
    pub product: i32,
    #[prost(int32, repeated, tag = "30")]
    pub product_flags: Vec<i32>,
    #[prost(int32, required, tag = "40")]
    pub platform_version: i32,
    #[prost(int32, required, tag = "50", default = "117300517")]
    pub version: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanHello {
    #[prost(bytes, required, tag = "10")]
    pub gc: Vec<u8>,
    #[prost(int32, required, tag = "20")]
    pub server_keys_known: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoHelloUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanHello>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(message, required, tag = "10")]
    pub build_info: BuildInfo,
    #[prost(int32, repeated, tag = "20")]
    pub cryptosuites_supported: Vec<i32>,
    #[prost(message, required, tag = "30")]
    pub login_crypto_hello: LoginCryptoHelloUnion,
    #[prost(bytes, required, tag = "40")]
    pub client_nonce: Vec<u8>,
    #[prost(bytes, optional, tag = "50")]
    pub padding: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanChallenge {
    #[prost(bytes, required, tag = "10")]
    pub gs: Vec<u8>,
    #[prost(bytes, required, tag = "20")]
    pub gs_signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoChallengeUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanChallenge>,
}

#[derive(Clone, PartialEq, Message)]
pub struct APResponseMessage {
    #[prost(message, optional, tag = "10")]
    pub challenge: Option<APChallenge>,
}

#[derive(Clone, PartialEq, Message)]
pub struct APChallenge {
    #[prost(message, required, tag = "10")]
    pub login_crypto_challenge: LoginCryptoChallengeUnion,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoDiffieHellmanResponse {
    #[prost(bytes, required, tag = "10")]
    pub hmac: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCryptoResponseUnion {
    #[prost(message, optional, tag = "10")]
    pub diffie_hellman: Option<LoginCryptoDiffieHellmanResponse>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientResponsePlaintext {
    #[prost(message, required, tag = "10")]
    pub login_crypto_response: LoginCryptoResponseUnion,
}

/// `AuthenticationType`, as used in `LoginCredentials.typ`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum AuthenticationType {
    UserPass = 0,
    StoredSpotifyCredentials = 1,
    StoredFacebookCredentials = 2,
    SpotifyToken = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginCredentials {
    #[prost(string, required, tag = "1")]
    pub username: String,
    #[prost(enumeration = "AuthenticationType", required, tag = "2")]
    pub typ: i32,
    #[prost(bytes, required, tag = "3")]
    pub auth_data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SystemInfo {
    #[prost(int32, required, tag = "1")]
    pub os: i32,
    #[prost(int32, required, tag = "2")]
    pub cpu_family: i32,
    #[prost(string, required, tag = "3")]
    pub system_information_string: String,
    #[prost(string, required, tag = "4")]
    pub device_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientResponseEncrypted {
    #[prost(message, required, tag = "10")]
    pub login_credentials: LoginCredentials,
    #[prost(message, required, tag = "20")]
    pub system_info: SystemInfo,
    #[prost(string, optional, tag = "30")]
    pub version_string: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct APWelcome {
    #[prost(string, required, tag = "1")]
    pub canonical_username: String,
    #[prost(enumeration = "AuthenticationType", required, tag = "2")]
    pub reusable_auth_credentials_type: i32,
    #[prost(bytes, required, tag = "3")]
    pub reusable_auth_credentials: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct APLoginFailed {
    #[prost(int32, required, tag = "1")]
    pub error_code: i32,
}

/// A single Mercury request/response part's user-defined header field.
#[derive(Clone, PartialEq, Message)]
pub struct UserField {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(bytes, required, tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(string, optional, tag = "1")]
    pub uri: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub method: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub status_code: Option<i32>,
    #[prost(string, optional, tag = "4")]
    pub content_type: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub user_fields: Vec<UserField>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Subscription {
    #[prost(string, required, tag = "1")]
    pub uri: String,
}

/// `AudioFile.Format`, the encoded-variant tag attached to each file.
#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum AudioFormat {
    OggVorbis96 = 0,
    OggVorbis160 = 1,
    OggVorbis320 = 2,
    Mp3256 = 3,
    Mp3320 = 4,
    Mp3160 = 5,
    Mp396 = 6,
    Mp3160Enc = 7,
    Aac24 = 8,
    Aac48 = 9,
    Aac24Norm = 10,
    FlacFlac = 16,
    FlacFlac24Bit = 17,
}

#[derive(Clone, PartialEq, Message)]
pub struct AudioFile {
    #[prost(bytes, optional, tag = "1")]
    pub file_id: Option<Vec<u8>>,
    #[prost(enumeration = "AudioFormat", optional, tag = "2")]
    pub format: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Track {
    #[prost(bytes, optional, tag = "1")]
    pub gid: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "9")]
    pub file: Vec<AudioFile>,
    #[prost(message, repeated, tag = "11")]
    pub alternative: Vec<Track>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Episode {
    #[prost(bytes, optional, tag = "1")]
    pub gid: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "11")]
    pub file: Vec<AudioFile>,
    #[prost(string, optional, tag = "20")]
    pub external_url: Option<String>,
}

/// `StorageResolveResponse.Result`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum StorageResolveResult {
    Cdn = 0,
    Storage = 1,
    Restricted = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct StorageResolveResponse {
    #[prost(enumeration = "StorageResolveResult", optional, tag = "1")]
    pub result: Option<i32>,
    #[prost(string, repeated, tag = "2")]
    pub cdnurl: Vec<String>,
}

/// A single updated user attribute, pushed over Mercury on
/// `spotify:user:attributes:update`.
#[derive(Clone, PartialEq, Message)]
pub struct UserAttributePair {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserAttributesUpdate {
    #[prost(message, repeated, tag = "1")]
    pub pairs: Vec<UserAttributePair>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnectivitySdkData {
    #[prost(string, optional, tag = "1")]
    pub device_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientDataRequest {
    #[prost(string, required, tag = "1")]
    pub client_id: String,
    #[prost(string, required, tag = "2")]
    pub client_version: String,
    #[prost(message, optional, tag = "3")]
    pub connectivity_sdk_data: Option<ConnectivitySdkData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientTokenRequest {
    #[prost(int32, required, tag = "1")]
    pub request_type: i32,
    #[prost(message, required, tag = "2")]
    pub client_data: ClientDataRequest,
}

#[derive(Clone, PartialEq, Message)]
pub struct GrantedTokenResponse {
    #[prost(string, required, tag = "1")]
    pub token: String,
    #[prost(int64, optional, tag = "3")]
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientTokenResponse {
    #[prost(int32, required, tag = "1")]
    pub response_type: i32,
    #[prost(message, optional, tag = "2")]
    pub granted_token: Option<GrantedTokenResponse>,
}
