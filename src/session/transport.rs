//! Encrypted packet framing over the Shannon cipher pair established by
//! the handshake.

use std::io::{Read, Write};

use crate::crypto::Shannon;
use crate::error::{Error, Result};

use super::packet::Packet;

/// The two keyed Shannon ciphers and their independent nonce counters
/// that a session uses once the handshake completes.
pub struct CipherPair {
    send_cipher: Shannon,
    send_nonce: u32,
    receive_cipher: Shannon,
    receive_nonce: u32,
}

impl CipherPair {
    /// Build from the send/receive key slices derived during the
    /// handshake (bytes `20..52` and `52..84` of the HMAC-derived key
    /// material).
    pub fn new(send_key: &[u8], receive_key: &[u8]) -> CipherPair {
        let mut send_cipher = Shannon::new();
        send_cipher.key(send_key);
        let mut receive_cipher = Shannon::new();
        receive_cipher.key(receive_key);
        CipherPair {
            send_cipher,
            send_nonce: 0,
            receive_cipher,
            receive_nonce: 0,
        }
    }

    /// Frame, encrypt, and write one packet: `cmd ‖ len(u16 BE) ‖ payload
    /// ‖ mac(4)`. Advances the send nonce exactly once.
    pub fn send_encoded<W: Write>(&mut self, w: &mut W, cmd: u8, payload: &[u8]) -> Result<()> {
        self.send_cipher.nonce_u32(self.send_nonce);
        self.send_nonce += 1;

        let mut buffer = Vec::with_capacity(3 + payload.len());
        buffer.push(cmd);
        buffer.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buffer.extend_from_slice(payload);

        self.send_cipher.encrypt(&mut buffer);
        let mac = self.send_cipher.finish(4);

        w.write_all(&buffer)?;
        w.write_all(&mac)?;
        w.flush()?;
        Ok(())
    }

    /// Read, decrypt, and MAC-check one packet. Advances the receive
    /// nonce exactly once. A MAC mismatch is [`Error::MacMismatch`] and
    /// is fatal to the session.
    pub fn receive_encoded<R: Read>(&mut self, r: &mut R) -> Result<Packet> {
        self.receive_cipher.nonce_u32(self.receive_nonce);
        self.receive_nonce += 1;

        let mut header = [0u8; 3];
        r.read_exact(&mut header)?;
        self.receive_cipher.decrypt(&mut header);

        let cmd = header[0];
        let payload_length = u16::from_be_bytes([header[1], header[2]]) as usize;

        let mut payload = vec![0u8; payload_length];
        r.read_exact(&mut payload)?;
        self.receive_cipher.decrypt(&mut payload);

        let mut mac = [0u8; 4];
        r.read_exact(&mut mac)?;

        let expected = self.receive_cipher.finish(4);
        if mac[..] != expected[..] {
            return Err(Error::MacMismatch);
        }

        Ok(Packet { cmd, payload })
    }

    /// Number of packets sent so far on this session.
    pub fn send_nonce(&self) -> u32 {
        self.send_nonce
    }

    /// Number of packets received so far on this session.
    pub fn receive_nonce(&self) -> u32 {
        self.receive_nonce
    }

    /// Split into independent encode/decode halves so the send and
    /// receive sides can live on separate threads.
    pub fn split(self) -> (Encoder, Decoder) {
        (
            Encoder {
                cipher: self.send_cipher,
                nonce: self.send_nonce,
            },
            Decoder {
                cipher: self.receive_cipher,
                nonce: self.receive_nonce,
            },
        )
    }
}

/// The send half of a [`CipherPair`], owned by the encoding thread.
pub struct Encoder {
    cipher: Shannon,
    nonce: u32,
}

impl Encoder {
    /// See [`CipherPair::send_encoded`].
    pub fn send<W: Write>(&mut self, w: &mut W, cmd: u8, payload: &[u8]) -> Result<()> {
        self.cipher.nonce_u32(self.nonce);
        self.nonce += 1;

        let mut buffer = Vec::with_capacity(3 + payload.len());
        buffer.push(cmd);
        buffer.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buffer.extend_from_slice(payload);

        self.cipher.encrypt(&mut buffer);
        let mac = self.cipher.finish(4);

        w.write_all(&buffer)?;
        w.write_all(&mac)?;
        w.flush()?;
        Ok(())
    }
}

/// The receive half of a [`CipherPair`], owned by the decoding thread.
pub struct Decoder {
    cipher: Shannon,
    nonce: u32,
}

impl Decoder {
    /// See [`CipherPair::receive_encoded`].
    pub fn receive<R: Read>(&mut self, r: &mut R) -> Result<Packet> {
        self.cipher.nonce_u32(self.nonce);
        self.nonce += 1;

        let mut header = [0u8; 3];
        r.read_exact(&mut header)?;
        self.cipher.decrypt(&mut header);

        let cmd = header[0];
        let payload_length = u16::from_be_bytes([header[1], header[2]]) as usize;

        let mut payload = vec![0u8; payload_length];
        r.read_exact(&mut payload)?;
        self.cipher.decrypt(&mut payload);

        let mut mac = [0u8; 4];
        r.read_exact(&mut mac)?;

        let expected = self.cipher.finish(4);
        if mac[..] != expected[..] {
            return Err(Error::MacMismatch);
        }

        Ok(Packet { cmd, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn send_then_receive_roundtrips() {
        let send_key = [1u8; 32];
        let recv_key = [2u8; 32];
        let mut sender = CipherPair::new(&send_key, &recv_key);
        let mut receiver = CipherPair::new(&recv_key, &send_key);

        let mut wire = Vec::new();
        sender.send_encoded(&mut wire, 0x04, b"hello world").unwrap();

        let mut cursor = Cursor::new(wire);
        let packet = receiver.receive_encoded(&mut cursor).unwrap();
        assert_eq!(packet.cmd, 0x04);
        assert_eq!(packet.payload, b"hello world");
    }

    #[test]
    fn nonces_increment_per_packet() {
        let mut sender = CipherPair::new(&[3u8; 32], &[4u8; 32]);
        let mut wire = Vec::new();
        sender.send_encoded(&mut wire, 0x01, b"a").unwrap();
        sender.send_encoded(&mut wire, 0x01, b"b").unwrap();
        assert_eq!(sender.send_nonce(), 2);
    }

    #[test]
    fn tampered_payload_fails_mac_check() {
        let mut sender = CipherPair::new(&[5u8; 32], &[6u8; 32]);
        let mut receiver = CipherPair::new(&[6u8; 32], &[5u8; 32]);

        let mut wire = Vec::new();
        sender.send_encoded(&mut wire, 0x04, b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut cursor = Cursor::new(wire);
        let result = receiver.receive_encoded(&mut cursor);
        assert!(matches!(result, Err(Error::MacMismatch)));
    }
}
