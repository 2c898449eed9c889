//! The authenticated session with a Spotify access point: key exchange,
//! login, encrypted packet I/O, the receiver/dispatch loop, and automatic
//! reconnection. Owns the TCP socket and the Shannon cipher pair; shares
//! dispatch access with [`crate::mercury::MercuryManager`] and
//! [`crate::audio_key::AudioKeyManager`] through a cheap channel sender
//! rather than a back-reference to the session itself (see DESIGN.md).

pub mod handshake;
pub mod packet;
pub mod transport;

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::resolver::ApResolver;
use crate::audio_key::AudioKeyManager;
use crate::config::{Credentials, SessionConfig, StoredCredentials};
use crate::error::{Error, Result};
use crate::mercury::MercuryManager;

use packet::{Packet, PacketType};
use transport::{CipherPair, Decoder, Encoder};

/// A request queued for the encode thread: a raw command byte and its
/// plaintext payload. The encoder seeds the send cipher and frames it.
pub struct EncodeMsg {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

enum SessionEvent {
    Packet(Packet),
    DecodeError(io::Error),
    EncodeError(io::Error),
}

struct Connected {
    encoder: Encoder,
    decoder: Decoder,
    shutdown_handle: TcpStream,
}

struct SessionShared {
    config: SessionConfig,
    resolver: ApResolver,
    credentials: Mutex<Credentials>,
    country_code: Mutex<Option<String>>,
    user_attributes: Mutex<HashMap<String, String>>,
    mercury: MercuryManager,
    audio_key: AudioKeyManager,
    encode_tx: Sender<EncodeMsg>,
    encode_rx: Receiver<EncodeMsg>,
    closed: AtomicBool,
    shutdown_stream: Mutex<Option<TcpStream>>,
    worker_pool: rayon::ThreadPool,
    stored_credentials: Mutex<Option<StoredCredentials>>,
}

/// A handle to a live access-point session. Cheap to clone; all clones
/// share the same underlying connection and dispatch threads.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

/// How long without a ping before the session preemptively reconnects.
const PING_TIMEOUT: Duration = Duration::from_secs(125);

fn connect_once(resolver: &ApResolver, config: &SessionConfig, credentials: &Credentials) -> Result<(Connected, crate::proto::APWelcome, StoredCredentials)> {
    let ap_addr = resolver.random("accesspoint")?;
    info!(ap = %ap_addr, "connecting to access point");
    let mut stream = TcpStream::connect(&ap_addr)?;
    stream.set_nodelay(true)?;

    let handshake::HandshakeResult { mut cipher_pair } = handshake::perform(&mut stream, config)?;
    let (welcome, stored) = handshake::authenticate(&mut stream, &mut cipher_pair, credentials, config)?;

    let shutdown_handle = stream.try_clone()?;
    let (encoder, decoder) = cipher_pair.split();
    Ok((
        Connected {
            encoder,
            decoder,
            shutdown_handle,
        },
        welcome,
        stored,
    ))
}

impl Session {
    /// Resolve an access point, perform the handshake and login, and
    /// start the receiver/dispatch threads. Blocks until authentication
    /// completes or fails.
    pub fn connect(config: SessionConfig, credentials: Credentials) -> Result<Session> {
        let resolver = ApResolver::new();
        let (connected, welcome, stored) = connect_once(&resolver, &config, &credentials)?;

        let (encode_tx, encode_rx) = unbounded();
        let worker_pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("spotclient-worker-{i}"))
            .build()
            .map_err(|e| Error::Crypto(format!("failed to start worker pool: {e}")))?;

        let shared = Arc::new(SessionShared {
            mercury: MercuryManager::new(encode_tx.clone()),
            audio_key: AudioKeyManager::new(encode_tx.clone()),
            config,
            resolver,
            credentials: Mutex::new(credentials),
            country_code: Mutex::new(None),
            user_attributes: Mutex::new(HashMap::new()),
            encode_tx,
            encode_rx,
            closed: AtomicBool::new(false),
            shutdown_stream: Mutex::new(Some(connected.shutdown_handle.try_clone()?)),
            worker_pool,
            stored_credentials: Mutex::new(Some(stored)),
        });

        info!(user = %welcome.canonical_username, "authenticated");

        let supervisor_shared = shared.clone();
        thread::spawn(move || run_supervisor(supervisor_shared, connected));

        Ok(Session { shared })
    }

    /// The device identity this session advertised at login.
    pub fn device_id(&self) -> &str {
        &self.shared.config.device_id
    }

    /// The country code reported by the access point, if received yet.
    pub fn country_code(&self) -> Option<String> {
        self.shared.country_code.lock().clone()
    }

    /// A user attribute parsed from the `product_info` XML blob, or the
    /// fallback if absent.
    pub fn user_attribute(&self, key: &str, fallback: Option<&str>) -> Option<String> {
        self.shared
            .user_attributes
            .lock()
            .get(key)
            .cloned()
            .or_else(|| fallback.map(str::to_string))
    }

    /// The Mercury request/response/pub-sub multiplexer for this session.
    pub fn mercury(&self) -> &MercuryManager {
        &self.shared.mercury
    }

    /// The per-file audio key manager for this session.
    pub fn audio_key(&self) -> &AudioKeyManager {
        &self.shared.audio_key
    }

    /// The access-point resolver this session uses for metadata/CDN
    /// requests (`spclient`, `dealer`, ...).
    pub fn resolver(&self) -> &ApResolver {
        &self.shared.resolver
    }

    /// The reusable credential persisted after the most recent
    /// successful login, suitable for [`StoredCredentials::save`].
    pub fn stored_credentials(&self) -> Option<StoredCredentials> {
        self.shared.stored_credentials.lock().clone()
    }

    /// Run a closure on the session's shared worker pool. Used for CDN
    /// chunk fetches and halt/resume notifications.
    pub fn spawn<F: FnOnce() + Send + 'static>(&self, job: F) {
        self.shared.worker_pool.spawn(job);
    }

    /// Send a raw command/payload over the session. Non-blocking: queues
    /// onto the encode thread.
    pub fn send_packet(&self, cmd: u8, payload: Vec<u8>) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.shared
            .encode_tx
            .send(EncodeMsg { cmd, payload })
            .map_err(|_| Error::Closed)
    }

    /// Whether the session has been closed (explicitly, or after
    /// exhausting reconnect attempts).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Tear down the session: wakes all Mercury/audio-key waiters with
    /// [`Error::Closed`] and shuts down the socket so the receiver
    /// thread unblocks. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.shared.shutdown_stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.shared.mercury.fail_all();
        self.shared.audio_key.fail_all();
    }
}

fn decode_loop(mut decoder: Decoder, mut stream: TcpStream, events: Sender<SessionEvent>) {
    loop {
        match decoder.receive(&mut stream) {
            Ok(packet) => {
                if events.send(SessionEvent::Packet(packet)).is_err() {
                    break;
                }
            }
            Err(Error::Io(e)) => {
                let _ = events.send(SessionEvent::DecodeError(e));
                break;
            }
            Err(other) => {
                let _ = events.send(SessionEvent::DecodeError(io::Error::new(
                    io::ErrorKind::Other,
                    other.to_string(),
                )));
                break;
            }
        }
    }
}

fn encode_loop(
    mut encoder: Encoder,
    mut stream: TcpStream,
    messages: Receiver<EncodeMsg>,
    events: Sender<SessionEvent>,
) {
    for msg in messages {
        if let Err(e) = encoder.send(&mut stream, msg.cmd, &msg.payload) {
            let io_err = match e {
                Error::Io(e) => e,
                other => io::Error::new(io::ErrorKind::Other, other.to_string()),
            };
            let _ = events.send(SessionEvent::EncodeError(io_err));
            break;
        }
    }
}

/// Owns the pair of threads for one TCP connection, the select loop that
/// dispatches decoded packets, the ping-timeout watchdog, and the
/// reconnect-on-fatal-error policy.
fn run_supervisor(shared: Arc<SessionShared>, mut connected: Connected) {
    loop {
        let (event_tx, event_rx) = unbounded::<SessionEvent>();
        let Connected {
            decoder,
            encoder,
            shutdown_handle,
        } = connected;
        let decode_stream = match shutdown_handle.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to clone socket for decode thread");
                break;
            }
        };
        let encode_stream = match shutdown_handle.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to clone socket for encode thread");
                break;
            }
        };

        let decode_events = event_tx.clone();
        let decode_handle: JoinHandle<()> =
            thread::spawn(move || decode_loop(decoder, decode_stream, decode_events));
        let encode_events = event_tx.clone();
        let encode_rx = shared.encode_rx.clone();
        let encode_handle: JoinHandle<()> =
            thread::spawn(move || encode_loop(encoder, encode_stream, encode_rx, encode_events));

        let mut last_ping = Instant::now();
        let watchdog = tick(Duration::from_secs(5));
        let fatal;

        loop {
            if shared.closed.load(Ordering::SeqCst) {
                fatal = false;
                break;
            }
            select! {
                recv(event_rx) -> msg => match msg {
                    Ok(SessionEvent::Packet(packet)) => dispatch_packet(&shared, packet, &mut last_ping),
                    Ok(SessionEvent::DecodeError(e)) => {
                        warn!(error = %e, "session receive failed");
                        fatal = true;
                        break;
                    }
                    Ok(SessionEvent::EncodeError(e)) => {
                        warn!(error = %e, "session send failed");
                        fatal = true;
                        break;
                    }
                    Err(_) => { fatal = true; break; }
                },
                recv(watchdog) -> _ => {
                    if last_ping.elapsed() > PING_TIMEOUT {
                        warn!("no ping in 125s, reconnecting");
                        fatal = true;
                        break;
                    }
                },
            }
        }

        let _ = decode_handle.join();
        drop(event_tx);
        let _ = encode_handle.join();

        if shared.closed.load(Ordering::SeqCst) {
            debug!("session closed, supervisor exiting");
            return;
        }
        if !fatal {
            // `shared.closed` is monotonic (only ever set, never cleared), so if this
            // path was reached `fatal` can only be `false` because the inner loop
            // observed `shared.closed` true — meaning the check above already
            // returned. Kept as a `return` (not `continue`) because `connected`'s
            // decoder/encoder have already been handed to the now-finished
            // decode/encode threads and cannot be reused for another iteration.
            return;
        }

        match reconnect(&shared) {
            Ok(new_connected) => {
                info!("reconnected");
                connected = new_connected;
            }
            Err(e) => {
                error!(error = %e, "reconnect failed, closing session");
                shared.closed.store(true, Ordering::SeqCst);
                shared.mercury.fail_all();
                shared.audio_key.fail_all();
                return;
            }
        }
    }
}

fn reconnect(shared: &Arc<SessionShared>) -> Result<Connected> {
    let credentials = shared.credentials.lock().clone();
    let (connected, welcome, stored) = connect_once(&shared.resolver, &shared.config, &credentials)?;
    *shared.shutdown_stream.lock() = Some(connected.shutdown_handle.try_clone()?);
    *shared.stored_credentials.lock() = Some(stored.clone());
    *shared.credentials.lock() = Credentials::Stored(stored);
    info!(user = %welcome.canonical_username, "re-authenticated");
    Ok(connected)
}

fn dispatch_packet(shared: &Arc<SessionShared>, packet: Packet, last_ping: &mut Instant) {
    match packet.kind() {
        Some(PacketType::Ping) => {
            *last_ping = Instant::now();
            let _ = shared.encode_tx.send(EncodeMsg {
                cmd: PacketType::Pong.cmd(),
                payload: packet.payload,
            });
        }
        Some(PacketType::CountryCode) => {
            if let Ok(code) = String::from_utf8(packet.payload) {
                debug!(country = %code, "received country code");
                *shared.country_code.lock() = Some(code);
            }
        }
        Some(PacketType::ProductInfo) => {
            let attrs = parse_product_info(&packet.payload);
            debug!(count = attrs.len(), "parsed product info");
            shared.user_attributes.lock().extend(attrs);
        }
        Some(PacketType::LicenseVersion) => {
            debug!("received license version");
        }
        Some(PacketType::MercuryReq)
        | Some(PacketType::MercurySub)
        | Some(PacketType::MercuryUnsub)
        | Some(PacketType::MercuryEvent) => {
            shared.mercury.handle_packet(packet);
        }
        Some(PacketType::AesKey) | Some(PacketType::AesKeyError) => {
            shared.audio_key.handle_packet(packet);
        }
        _ => {
            debug!(cmd = format!("{:#x}", packet.cmd), "dropped unhandled packet");
        }
    }
}

/// Parse the flat `product_info` XML: a `<products><product>` document
/// whose first-level children under `<product>` are `tag -> text` user
/// attributes. Hand-rolled rather than pulling in an XML crate, since
/// the document shape is this one fixed pattern.
fn parse_product_info(data: &[u8]) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let text = match std::str::from_utf8(data) {
        Ok(t) => t,
        Err(_) => return attrs,
    };
    let product_start = match text.find("<product>") {
        Some(i) => i + "<product>".len(),
        None => return attrs,
    };
    let product_end = match text.find("</product>") {
        Some(i) => i,
        None => return attrs,
    };
    let body = &text[product_start..product_end];
    let mut rest = body;
    while let Some(open) = rest.find('<') {
        let after_open = &rest[open + 1..];
        let tag_end = match after_open.find('>') {
            Some(i) => i,
            None => break,
        };
        let tag = &after_open[..tag_end];
        if tag.starts_with('/') {
            rest = &after_open[tag_end + 1..];
            continue;
        }
        let close_tag = format!("</{tag}>");
        let value_start = &after_open[tag_end + 1..];
        if let Some(close_at) = value_start.find(&close_tag) {
            attrs.insert(tag.to_string(), value_start[..close_at].to_string());
            rest = &value_start[close_at + close_tag.len()..];
        } else {
            break;
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_product_info_xml() {
        let xml = b"<products><product><catalogue>premium</catalogue><type>premium</type></product></products>";
        let attrs = parse_product_info(xml);
        assert_eq!(attrs.get("catalogue").map(String::as_str), Some("premium"));
        assert_eq!(attrs.get("type").map(String::as_str), Some("premium"));
    }

    #[test]
    fn returns_empty_map_for_malformed_xml() {
        assert!(parse_product_info(b"not xml at all").is_empty());
    }
}
