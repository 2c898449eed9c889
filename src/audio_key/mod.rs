//! Audio key requests: the per-file AES key used to decrypt CDN chunks.
//! One request in flight per (track, file) pair; the
//! access point replies with `cmd=0x0d` (key) or `cmd=0x0e` (error),
//! both prefixed with the 4-byte sequence number echoed from the request.

use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::session::packet::{Packet, PacketType};
use crate::session::EncodeMsg;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// One retry on timeout, per the original client's behavior.
const MAX_ATTEMPTS: u32 = 2;

/// Manages in-flight audio-key requests for one session, keyed by the
/// sequence number sent in the request.
pub struct AudioKeyManager {
    encode_tx: Sender<EncodeMsg>,
    next_seq: Mutex<u32>,
    pending: DashMap<u32, Sender<Result<[u8; 16]>>>,
}

impl AudioKeyManager {
    pub fn new(encode_tx: Sender<EncodeMsg>) -> AudioKeyManager {
        AudioKeyManager {
            encode_tx,
            next_seq: Mutex::new(0),
            pending: DashMap::new(),
        }
    }

    fn next_sequence(&self) -> u32 {
        let mut seq = self.next_seq.lock();
        let value = *seq;
        *seq = seq.wrapping_add(1);
        value
    }

    fn request_once(&self, track_gid: &[u8; 16], file_id: &[u8]) -> Result<[u8; 16]> {
        let seq = self.next_sequence();

        let mut payload = Vec::with_capacity(16 + file_id.len() + 6);
        payload.extend_from_slice(file_id);
        payload.extend_from_slice(track_gid);
        payload.extend_from_slice(&seq.to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00]);

        let (tx, rx) = bounded(1);
        self.pending.insert(seq, tx);

        if self
            .encode_tx
            .send(EncodeMsg {
                cmd: PacketType::RequestKey.cmd(),
                payload,
            })
            .is_err()
        {
            self.pending.remove(&seq);
            return Err(Error::Closed);
        }

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&seq);
                Err(Error::AudioKeyTimeout)
            }
        }
    }

    /// Request the AES key for a file, retrying once on timeout.
    pub fn request(&self, track_gid: &[u8; 16], file_id: &[u8]) -> Result<[u8; 16]> {
        let mut last_err = Error::AudioKeyTimeout;
        for _ in 0..MAX_ATTEMPTS {
            match self.request_once(track_gid, file_id) {
                Ok(key) => return Ok(key),
                Err(Error::AudioKeyTimeout) => last_err = Error::AudioKeyTimeout,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Route an `AesKey`/`AesKeyError` packet to its waiting request.
    pub fn handle_packet(&self, packet: Packet) {
        if packet.payload.len() < 4 {
            warn!("audio key packet too short");
            return;
        }
        let seq = u32::from_be_bytes([
            packet.payload[0],
            packet.payload[1],
            packet.payload[2],
            packet.payload[3],
        ]);
        let Some((_, tx)) = self.pending.remove(&seq) else {
            warn!(seq, "audio key response for unknown sequence");
            return;
        };

        if packet.is(PacketType::AesKeyError) {
            let code = if packet.payload.len() >= 6 {
                u16::from_be_bytes([packet.payload[4], packet.payload[5]])
            } else {
                0
            };
            let _ = tx.send(Err(Error::AudioKeyError(code)));
            return;
        }

        if packet.payload.len() < 20 {
            let _ = tx.send(Err(Error::Crypto("audio key response too short".to_string())));
            return;
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&packet.payload[4..20]);
        let _ = tx.send(Ok(key));
    }

    /// Wake every pending request with [`Error::Closed`].
    pub fn fail_all(&self) {
        let keys: Vec<_> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(Error::Closed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_extracts_16_byte_key() {
        let (encode_tx, encode_rx) = bounded(1);
        let mgr = AudioKeyManager::new(encode_tx);
        let track_gid = [1u8; 16];
        let file_id = vec![2u8; 20];

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| mgr.request(&track_gid, &file_id));

            let sent = encode_rx.recv_timeout(Duration::from_secs(1)).unwrap();
            let seq = u32::from_be_bytes([
                sent.payload[36],
                sent.payload[37],
                sent.payload[38],
                sent.payload[39],
            ]);

            let mut response = seq.to_be_bytes().to_vec();
            response.extend_from_slice(&[9u8; 16]);
            mgr.handle_packet(Packet::new(PacketType::AesKey, response));

            let key = handle.join().unwrap().unwrap();
            assert_eq!(key, [9u8; 16]);
        });
    }

    #[test]
    fn error_response_carries_code() {
        let (encode_tx, encode_rx) = bounded(1);
        let mgr = AudioKeyManager::new(encode_tx);
        let track_gid = [0u8; 16];
        let file_id = vec![0u8; 20];

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| mgr.request_once(&track_gid, &file_id));

            let sent = encode_rx.recv_timeout(Duration::from_secs(1)).unwrap();
            let seq = &sent.payload[36..40];

            let mut response = seq.to_vec();
            response.extend_from_slice(&[0x00, 0x02]);
            mgr.handle_packet(Packet::new(PacketType::AesKeyError, response));

            let result = handle.join().unwrap();
            assert!(matches!(result, Err(Error::AudioKeyError(2))));
        });
    }
}
