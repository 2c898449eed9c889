//! Mercury: the sequenced multi-part request/response and pub/sub
//! multiplexer layered over the encrypted session packets.
//!
//! Every outbound request gets a fresh 4-byte big-endian sequence number;
//! the response (and any number of further pushed events sharing that
//! sequence, or sharing a subscribed URI) is reassembled from one or more
//! parts, the first of which is always a serialized [`crate::proto::Header`].

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use prost::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::proto::{self, Header};
use crate::session::packet::{Packet, PacketType};
use crate::session::EncodeMsg;

/// Request verb: which command byte and response semantics apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MercuryMethod {
    Get,
    Send,
    Sub,
    Unsub,
}

impl MercuryMethod {
    fn as_str(self) -> &'static str {
        match self {
            MercuryMethod::Get => "GET",
            MercuryMethod::Send => "SEND",
            MercuryMethod::Sub => "SUB",
            MercuryMethod::Unsub => "UNSUB",
        }
    }
}

/// An outbound Mercury request: a method/URI plus zero or more payload
/// parts following the header.
#[derive(Debug, Clone)]
pub struct MercuryRequest {
    pub method: MercuryMethod,
    pub uri: String,
    pub payload: Vec<Vec<u8>>,
    pub content_type: Option<String>,
}

impl MercuryRequest {
    pub fn get(uri: impl Into<String>) -> MercuryRequest {
        MercuryRequest {
            method: MercuryMethod::Get,
            uri: uri.into(),
            payload: Vec::new(),
            content_type: None,
        }
    }

    pub fn send(uri: impl Into<String>, payload: Vec<u8>) -> MercuryRequest {
        MercuryRequest {
            method: MercuryMethod::Send,
            uri: uri.into(),
            payload: vec![payload],
            content_type: None,
        }
    }

    pub fn sub(uri: impl Into<String>) -> MercuryRequest {
        MercuryRequest {
            method: MercuryMethod::Sub,
            uri: uri.into(),
            payload: Vec::new(),
            content_type: None,
        }
    }

    pub fn unsub(uri: impl Into<String>) -> MercuryRequest {
        MercuryRequest {
            method: MercuryMethod::Unsub,
            uri: uri.into(),
            payload: Vec::new(),
            content_type: None,
        }
    }
}

/// A reassembled Mercury response: the decoded header plus every
/// remaining part's raw bytes.
#[derive(Debug, Clone)]
pub struct MercuryResponse {
    pub uri: String,
    pub status_code: i32,
    pub payload: Vec<Vec<u8>>,
}

impl MercuryResponse {
    /// Decode the first payload part as JSON. Requires a 2xx status; a
    /// non-2xx response raises `MercuryError(status_code)` instead of
    /// being parsed.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if !(200..=299).contains(&self.status_code) {
            return Err(Error::MercuryError(self.status_code as u16));
        }
        let part = self
            .payload
            .first()
            .ok_or_else(|| Error::MercuryError(self.status_code as u16))?;
        Ok(serde_json::from_slice(part)?)
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

struct PartialFrame {
    header: Option<Header>,
    parts: Vec<Vec<u8>>,
    remaining: u16,
}

enum Pending {
    Reply(Sender<Result<MercuryResponse>>),
}

/// Owns the sequence counter, in-flight request table, and URI-prefix
/// subscription table for one session.
pub struct MercuryManager {
    encode_tx: Sender<EncodeMsg>,
    next_seq: Mutex<u64>,
    pending: DashMap<Vec<u8>, Pending>,
    subscriptions: Mutex<HashMap<String, Sender<MercuryResponse>>>,
    partial: DashMap<Vec<u8>, PartialFrame>,
}

impl MercuryManager {
    pub fn new(encode_tx: Sender<EncodeMsg>) -> MercuryManager {
        MercuryManager {
            encode_tx,
            next_seq: Mutex::new(0),
            pending: DashMap::new(),
            subscriptions: Mutex::new(HashMap::new()),
            partial: DashMap::new(),
        }
    }

    fn next_sequence(&self) -> Vec<u8> {
        let mut seq = self.next_seq.lock();
        let bytes = seq.to_be_bytes()[4..].to_vec();
        *seq += 1;
        bytes
    }

    fn frame(seq: &[u8], flags: u8, parts: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(seq.len() as u16).to_be_bytes());
        buf.extend_from_slice(seq);
        buf.push(flags);
        buf.extend_from_slice(&(parts.len() as u16).to_be_bytes());
        for part in parts {
            buf.extend_from_slice(&(part.len() as u16).to_be_bytes());
            buf.extend_from_slice(part);
        }
        buf
    }

    /// Send a request and block for its response (or time out after 3s).
    pub fn send_sync(&self, request: MercuryRequest) -> Result<MercuryResponse> {
        let seq = self.next_sequence();
        let header = Header {
            uri: Some(request.uri.clone()),
            method: Some(request.method.as_str().to_string()),
            status_code: None,
            content_type: request.content_type.clone(),
            user_fields: Vec::new(),
        };
        let mut parts = vec![header.encode_to_vec()];
        parts.extend(request.payload.clone());

        let (tx, rx) = bounded(1);
        self.pending.insert(seq.clone(), Pending::Reply(tx));

        let cmd = PacketType::for_mercury_method(request.method.as_str()).cmd();
        let frame = Self::frame(&seq, 1, &parts);
        if self.encode_tx.send(EncodeMsg { cmd, payload: frame }).is_err() {
            self.pending.remove(&seq);
            return Err(Error::Closed);
        }

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&seq);
                Err(Error::MercuryTimeout)
            }
        }
    }

    /// Subscribe to a URI prefix: sends a `SUB` request and registers a
    /// channel that receives every subsequent pushed event whose URI
    /// matches. Returns the subscription acknowledgement as well.
    pub fn subscribe(&self, uri: impl Into<String>) -> Result<(MercuryResponse, crossbeam_channel::Receiver<MercuryResponse>)> {
        let uri = uri.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscriptions.lock().insert(uri.clone(), tx.clone());
        let ack = self.send_sync(MercuryRequest::sub(uri.clone()))?;

        // The server may split a subscription into several concrete
        // prefixes; each part is a Subscription{uri} to match instead.
        let prefixes: Vec<String> = ack
            .payload
            .iter()
            .filter_map(|part| proto::Subscription::decode(part.as_slice()).ok())
            .map(|s| s.uri)
            .collect();
        if !prefixes.is_empty() {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.remove(&uri);
            for prefix in prefixes {
                subscriptions.insert(prefix, tx.clone());
            }
        }

        Ok((ack, rx))
    }

    pub fn unsubscribe(&self, uri: &str) -> Result<MercuryResponse> {
        self.subscriptions.lock().remove(uri);
        self.send_sync(MercuryRequest::unsub(uri))
    }

    /// Convenience: issue a `GET` and decode the first part as JSON.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, uri: impl Into<String>) -> Result<T> {
        self.send_sync(MercuryRequest::get(uri))?.json()
    }

    fn dispatch(&self, seq: Vec<u8>, header: Header, parts: Vec<Vec<u8>>) {
        let status_code = header.status_code.unwrap_or(200);
        let uri = header.uri.clone().unwrap_or_default();

        if uri == "hm://remote/3/user/attributes/update" || uri.ends_with(":update") {
            if let Some(first) = parts.first() {
                if let Ok(update) = proto::UserAttributesUpdate::decode(first.as_slice()) {
                    debug!(count = update.pairs.len(), "mercury pushed attribute update");
                }
            }
        }

        if let Some((_, Pending::Reply(tx))) = self.pending.remove(&seq) {
            let _ = tx.send(Ok(MercuryResponse {
                uri,
                status_code,
                payload: parts,
            }));
            return;
        }

        let subscriptions = self.subscriptions.lock();
        for (prefix, tx) in subscriptions.iter() {
            if uri.starts_with(prefix.as_str()) {
                let _ = tx.send(MercuryResponse {
                    uri: uri.clone(),
                    status_code,
                    payload: parts.clone(),
                });
            }
        }
    }

    /// Parse and reassemble one incoming Mercury packet; completes the
    /// matching pending request or routes to a subscription.
    pub fn handle_packet(&self, packet: Packet) {
        let buf = &packet.payload;
        if buf.len() < 3 {
            warn!("mercury packet too short");
            return;
        }
        let seq_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + seq_len + 3 {
            warn!("mercury packet truncated");
            return;
        }
        let seq = buf[2..2 + seq_len].to_vec();
        let flags = buf[2 + seq_len];
        let count = u16::from_be_bytes([buf[2 + seq_len + 1], buf[2 + seq_len + 2]]);

        let mut offset = 2 + seq_len + 3;
        let mut new_parts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if offset + 2 > buf.len() {
                warn!("mercury part length truncated");
                return;
            }
            let part_len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
            offset += 2;
            if offset + part_len > buf.len() {
                warn!("mercury part body truncated");
                return;
            }
            new_parts.push(buf[offset..offset + part_len].to_vec());
            offset += part_len;
        }

        let mut entry = self.partial.entry(seq.clone()).or_insert_with(|| PartialFrame {
            header: None,
            parts: Vec::new(),
            remaining: count,
        });

        for part in new_parts {
            if entry.header.is_none() {
                match Header::decode(part.as_slice()) {
                    Ok(header) => entry.header = Some(header),
                    Err(e) => {
                        warn!(error = %e, "malformed mercury header");
                        return;
                    }
                }
            } else {
                entry.parts.push(part);
            }
            if entry.remaining > 0 {
                entry.remaining -= 1;
            }
        }

        let is_final = flags == 1 && entry.remaining == 0;
        if !is_final {
            return;
        }

        drop(entry);
        if let Some((_, frame)) = self.partial.remove(&seq) {
            if let Some(header) = frame.header {
                self.dispatch(seq, header, frame.parts);
            }
        }
    }

    /// Wake every pending request and subscription with [`Error::Closed`].
    /// Subscriptions are dropped (their receivers simply disconnect).
    pub fn fail_all(&self) {
        let pending_keys: Vec<_> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in pending_keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                if let Pending::Reply(tx) = pending {
                    let _ = tx.send(Err(Error::Closed));
                }
            }
        }
        self.subscriptions.lock().clear();
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_seq_flags_parts() {
        let seq = vec![0, 0, 0, 7];
        let parts = vec![vec![1, 2, 3], vec![4, 5]];
        let framed = MercuryManager::frame(&seq, 1, &parts);
        assert_eq!(&framed[0..2], &[0, 4]);
        assert_eq!(&framed[2..6], seq.as_slice());
        assert_eq!(framed[6], 1);
        assert_eq!(&framed[7..9], &[0, 2]);
    }

    #[test]
    fn sequence_numbers_increase() {
        let (tx, _rx) = bounded(1);
        let mgr = MercuryManager::new(tx);
        let a = mgr.next_sequence();
        let b = mgr.next_sequence();
        assert!(a < b);
    }

    #[test]
    fn single_part_packet_resolves_pending_request() {
        let (encode_tx, _encode_rx) = bounded(8);
        let mgr = MercuryManager::new(encode_tx);
        let seq = mgr.next_sequence();
        let (tx, rx) = bounded(1);
        mgr.pending.insert(seq.clone(), Pending::Reply(tx));

        let header = Header {
            uri: Some("hm://test".to_string()),
            method: Some("GET".to_string()),
            status_code: Some(200),
            content_type: None,
            user_fields: Vec::new(),
        };
        let parts = vec![header.encode_to_vec(), b"body".to_vec()];
        let payload = MercuryManager::frame(&seq, 1, &parts);
        mgr.handle_packet(Packet::new(PacketType::MercuryReq, payload));

        let response = rx.recv().unwrap().unwrap();
        assert_eq!(response.uri, "hm://test");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.payload, vec![b"body".to_vec()]);
    }
}
