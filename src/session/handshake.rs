//! Key exchange and login: the framed plaintext handshake that
//! establishes the Shannon cipher pair, followed by the first encrypted
//! packet exchange that authenticates the user.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use hmac::{Hmac, Mac};
use prost::Message;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint as RsaBigUint, RsaPublicKey};
use sha1::Sha1;

use crate::config::SessionConfig;
use crate::crypto::DiffieHellman;
use crate::error::{Error, Result};
use crate::proto;

use super::packet::PacketType;
use super::transport::CipherPair;

/// Spotify's baked-in RSA server modulus (256 bytes / 2048-bit; see
/// DESIGN.md for why this differs from the commonly quoted 1024-bit
/// figure).
const SERVER_MODULUS_HEX: &str = "ace0460bffc230aff46bfec3bfbf863da191c6cc336c93a14fb3b01612acac6af180e7f614d9429dbe2e346643e362d2327a1a0d923baedd1402b18155056104d52c96a44c1ecc024ad4b20c001f17edc22fc43521c8f0cbaed2add72b0f9db3c5321a2afe59f35a0dac68f1fa621efb2c8d0cb7392d9247e3d7351a6dbd24c2ae255b88ffab73298a0bcccd0c58673189e8bd3480784a5fc96b899d956bfc86d74f33a6781796c9c32d0d32a5abcd0527e2f710a39613c42f99c027bfed049c3c275804b6b219f9c12f02e94863eca1b642a09d4825f8b39dd0e86af9484da1c2ba863042ea9db3086c190e48b39d66eb0006a25aeea11b13873cd719e655bd";
const SERVER_EXPONENT: u64 = 65537;

const CRYPTO_SUITE_SHANNON: i32 = 0;

fn server_key() -> RsaPublicKey {
    let modulus = RsaBigUint::from_bytes_be(&hex::decode(SERVER_MODULUS_HEX).unwrap());
    let exponent = RsaBigUint::from(SERVER_EXPONENT);
    RsaPublicKey::new(modulus, exponent).expect("baked-in server key is well-formed")
}

/// The outcome of a successful handshake: a keyed cipher pair and the
/// exact bytes exchanged, ready to authenticate over.
pub struct HandshakeResult {
    /// The cipher pair keyed from the derived send/receive keys.
    pub cipher_pair: CipherPair,
}

/// Perform the plaintext key-exchange handshake over a freshly connected
/// TCP stream. On success, the stream is left positioned to read/write
/// encrypted packets and a [`CipherPair`] is returned.
pub fn perform(stream: &mut TcpStream, _config: &SessionConfig) -> Result<HandshakeResult> {
    let mut accumulator = Vec::new();

    let keys = DiffieHellman::random();
    let mut nonce = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

    let client_hello = proto::ClientHello {
        build_info: proto::BuildInfo::default(),
        cryptosuites_supported: vec![CRYPTO_SUITE_SHANNON],
        login_crypto_hello: proto::LoginCryptoHelloUnion {
            diffie_hellman: Some(proto::LoginCryptoDiffieHellmanHello {
                gc: keys.public_key_bytes(),
                server_keys_known: 1,
            }),
        },
        client_nonce: nonce.to_vec(),
        padding: Some(vec![0x1e]),
    };

    let hello_bytes = client_hello.encode_to_vec();
    let length = (2 + 4 + hello_bytes.len()) as u32;

    let mut prefix = Vec::with_capacity(6);
    prefix.push(0x00);
    prefix.push(0x04);
    prefix.extend_from_slice(&length.to_be_bytes());

    stream.write_all(&prefix)?;
    stream.write_all(&hello_bytes)?;
    stream.flush()?;
    accumulator.extend_from_slice(&prefix);
    accumulator.extend_from_slice(&hello_bytes);

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let response_length = u32::from_be_bytes(len_buf) as usize;
    accumulator.extend_from_slice(&len_buf);

    let mut response_buf = vec![0u8; response_length - 4];
    stream.read_exact(&mut response_buf)?;
    accumulator.extend_from_slice(&response_buf);

    let ap_response = proto::APResponseMessage::decode(response_buf.as_slice())
        .map_err(|e| Error::HandshakeFailed(format!("malformed APResponseMessage: {e}")))?;
    let challenge = ap_response
        .challenge
        .and_then(|c| c.login_crypto_challenge.diffie_hellman)
        .ok_or_else(|| Error::HandshakeFailed("missing DH challenge".to_string()))?;

    let verifying_key = VerifyingKey::<Sha1>::new(server_key());
    let signature = Signature::try_from(challenge.gs_signature.as_slice())
        .map_err(|e| Error::HandshakeFailed(format!("malformed signature: {e}")))?;
    verifying_key
        .verify(&challenge.gs, &signature)
        .map_err(|_| Error::HandshakeFailed("server signature check failed".to_string()))?;

    let shared_key = keys.shared_secret(&challenge.gs);

    let mut derived = Vec::with_capacity(100);
    for i in 1u8..=5 {
        let mut mac = Hmac::<Sha1>::new_from_slice(&shared_key)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        mac.update(&accumulator);
        mac.update(&[i]);
        derived.extend_from_slice(&mac.finalize().into_bytes());
    }

    let mut challenge_mac =
        Hmac::<Sha1>::new_from_slice(&derived[..20]).map_err(|e| Error::Crypto(e.to_string()))?;
    challenge_mac.update(&accumulator);
    let challenge_hmac = challenge_mac.finalize().into_bytes();

    let client_response_plaintext = proto::ClientResponsePlaintext {
        login_crypto_response: proto::LoginCryptoResponseUnion {
            diffie_hellman: Some(proto::LoginCryptoDiffieHellmanResponse {
                hmac: challenge_hmac.to_vec(),
            }),
        },
    };
    let response_bytes = client_response_plaintext.encode_to_vec();
    let response_length = (4 + response_bytes.len()) as u32;
    stream.write_all(&response_length.to_be_bytes())?;
    stream.write_all(&response_bytes)?;
    stream.flush()?;

    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut scrap = [0u8; 4];
    match stream.read_exact(&mut scrap) {
        Ok(()) => {
            let length = u32::from_be_bytes(scrap) as usize;
            let mut payload = vec![0u8; length.saturating_sub(4)];
            stream.read_exact(&mut payload)?;
            return Err(Error::HandshakeFailed(
                "access point rejected handshake".to_string(),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
        Err(e) => return Err(Error::Io(e)),
    }
    stream.set_read_timeout(None)?;

    let cipher_pair = CipherPair::new(&derived[20..52], &derived[52..84]);
    Ok(HandshakeResult { cipher_pair })
}

/// Build the `ClientResponseEncrypted` login payload and the preferred
/// locale/nop packets the access point expects immediately after
/// welcome. Returns the serialized login packet; callers send it as
/// `cmd=0xab` and expect `0xac`/`0xad` in reply.
pub fn login_packet(
    credentials: &proto::LoginCredentials,
    config: &SessionConfig,
) -> Vec<u8> {
    let client_response_encrypted = proto::ClientResponseEncrypted {
        login_credentials: credentials.clone(),
        system_info: proto::SystemInfo {
            os: 0,
            cpu_family: 0,
            system_information_string: "spotclient".to_string(),
            device_id: config.device_id.clone(),
        },
        version_string: Some("spotclient-0.1.0".to_string()),
    };
    client_response_encrypted.encode_to_vec()
}

/// `cmd=0x0f` nop packet sent right after welcome.
pub fn post_welcome_nop() -> Vec<u8> {
    let mut bytes = [0u8; 20];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    bytes.to_vec()
}

/// `cmd=0x74` preferred-locale packet.
pub fn preferred_locale_packet(locale: &str) -> Vec<u8> {
    let mut buf = vec![0x00, 0x00, 0x10, 0x00, 0x02];
    buf.extend_from_slice(b"preferred-locale");
    buf.extend_from_slice(locale.as_bytes());
    buf
}

/// Convenience: the outbound command for the login packet.
pub fn login_cmd() -> u8 {
    PacketType::Login.cmd()
}

fn auth_type_to_str(typ: i32) -> &'static str {
    match typ {
        x if x == proto::AuthenticationType::UserPass as i32 => "AUTHENTICATION_USER_PASS",
        x if x == proto::AuthenticationType::StoredSpotifyCredentials as i32 => {
            "AUTHENTICATION_STORED_SPOTIFY_CREDENTIALS"
        }
        x if x == proto::AuthenticationType::StoredFacebookCredentials as i32 => {
            "AUTHENTICATION_STORED_FACEBOOK_CREDENTIALS"
        }
        _ => "AUTHENTICATION_SPOTIFY_TOKEN",
    }
}

fn auth_type_from_str(s: &str) -> proto::AuthenticationType {
    match s {
        "AUTHENTICATION_STORED_SPOTIFY_CREDENTIALS" => {
            proto::AuthenticationType::StoredSpotifyCredentials
        }
        "AUTHENTICATION_STORED_FACEBOOK_CREDENTIALS" => {
            proto::AuthenticationType::StoredFacebookCredentials
        }
        "AUTHENTICATION_SPOTIFY_TOKEN" => proto::AuthenticationType::SpotifyToken,
        _ => proto::AuthenticationType::UserPass,
    }
}

fn to_login_credentials(credentials: &crate::config::Credentials) -> Result<proto::LoginCredentials> {
    use crate::config::Credentials;
    match credentials {
        Credentials::UserPass { username, password } => Ok(proto::LoginCredentials {
            username: username.clone(),
            typ: proto::AuthenticationType::UserPass as i32,
            auth_data: password.clone().into_bytes(),
        }),
        Credentials::Stored(stored) => {
            use base64::Engine;
            let auth_data = base64::engine::general_purpose::STANDARD
                .decode(&stored.credentials)
                .map_err(|e| Error::InvalidId(format!("malformed stored credential: {e}")))?;
            Ok(proto::LoginCredentials {
                username: stored.username.clone(),
                typ: auth_type_from_str(&stored.auth_type) as i32,
                auth_data,
            })
        }
    }
}

/// Send the login packet and wait for `APWelcome`/`AuthFailure`, then send
/// the post-welcome nop and preferred-locale packets. Returns the welcome
/// message and a reusable credential blob to persist.
pub fn authenticate(
    stream: &mut TcpStream,
    cipher_pair: &mut CipherPair,
    credentials: &crate::config::Credentials,
    config: &SessionConfig,
) -> Result<(proto::APWelcome, crate::config::StoredCredentials)> {
    use base64::Engine;

    let login_credentials = to_login_credentials(credentials)?;
    let payload = login_packet(&login_credentials, config);
    cipher_pair.send_encoded(stream, login_cmd(), &payload)?;

    let packet = cipher_pair.receive_encoded(stream)?;
    if packet.is(PacketType::AuthFailure) {
        let failure = proto::APLoginFailed::decode(packet.payload.as_slice())
            .map_err(|e| Error::AuthenticationFailed(format!("malformed failure: {e}")))?;
        return Err(Error::AuthenticationFailed(format!(
            "error code {}",
            failure.error_code
        )));
    }
    if !packet.is(PacketType::ApWelcome) {
        return Err(Error::AuthenticationFailed(format!(
            "unexpected response cmd {:#x}",
            packet.cmd
        )));
    }
    let welcome = proto::APWelcome::decode(packet.payload.as_slice())
        .map_err(|e| Error::HandshakeFailed(format!("malformed APWelcome: {e}")))?;

    cipher_pair.send_encoded(stream, PacketType::Unknown0x0f.cmd(), &post_welcome_nop())?;
    cipher_pair.send_encoded(
        stream,
        PacketType::PreferredLocale.cmd(),
        &preferred_locale_packet(&config.preferred_locale),
    )?;

    let stored = crate::config::StoredCredentials {
        username: welcome.canonical_username.clone(),
        auth_type: auth_type_to_str(welcome.reusable_auth_credentials_type).to_string(),
        credentials: base64::engine::general_purpose::STANDARD
            .encode(&welcome.reusable_auth_credentials),
    };

    Ok((welcome, stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn server_key_parses() {
        let key = server_key();
        assert_eq!(key.size(), 256);
    }

    #[test]
    fn preferred_locale_framing() {
        let packet = preferred_locale_packet("en");
        assert_eq!(&packet[..5], &[0x00, 0x00, 0x10, 0x00, 0x02]);
        assert!(packet.ends_with(b"en"));
        assert!(packet.windows(16).any(|w| w == b"preferred-locale"));
    }

    #[test]
    fn post_welcome_nop_is_20_bytes() {
        assert_eq!(post_welcome_nop().len(), 20);
    }
}
