//! Shannon stream cipher: the bespoke LFSR-based cipher Spotify uses to
//! frame every packet after the handshake completes. There is no public
//! crate for it; this is a direct, word-for-word port of the reference
//! algorithm.

const N: usize = 16;
const FOLD: usize = N;
const INITKONST: u32 = 0x6996_c53a;
const KEYP: usize = 13;

/// A single direction's Shannon cipher state. A session keeps two: one
/// seeded for sending, one for receiving, each with its own nonce counter.
pub struct Shannon {
    r: [u32; N],
    crc: [u32; N],
    init_r: [u32; N],
    konst: u32,
    sbuf: u32,
    mbuf: u32,
    nbuf: u32,
}

impl Default for Shannon {
    fn default() -> Self {
        Shannon {
            r: [0; N],
            crc: [0; N],
            init_r: [0; N],
            konst: 0,
            sbuf: 0,
            mbuf: 0,
            nbuf: 0,
        }
    }
}

#[inline]
fn rotl(i: u32, distance: u32) -> u32 {
    i.rotate_left(distance)
}

impl Shannon {
    /// Construct a cipher that has not yet been keyed.
    pub fn new() -> Shannon {
        Shannon::default()
    }

    fn sbox(i: u32) -> u32 {
        let i = i ^ (rotl(i, 5) | rotl(i, 7));
        i ^ (rotl(i, 19) | rotl(i, 22))
    }

    fn sbox2(i: u32) -> u32 {
        let i = i ^ (rotl(i, 7) | rotl(i, 22));
        i ^ (rotl(i, 5) | rotl(i, 19))
    }

    fn cycle(&mut self) {
        let mut t = self.r[12] ^ self.r[13] ^ self.konst;
        t = Shannon::sbox(t) ^ rotl(self.r[0], 1);

        for i in 1..N {
            self.r[i - 1] = self.r[i];
        }
        self.r[N - 1] = t;

        let t2 = Shannon::sbox2(self.r[2] ^ self.r[15]);
        self.r[0] ^= t2;
        self.sbuf = t2 ^ self.r[8] ^ self.r[12];
    }

    fn crc_func(&mut self, i: u32) {
        let t = self.crc[0] ^ self.crc[2] ^ self.crc[15] ^ i;
        for j in 1..N {
            self.crc[j - 1] = self.crc[j];
        }
        self.crc[N - 1] = t;
    }

    fn mac_func(&mut self, i: u32) {
        self.crc_func(i);
        self.r[KEYP] ^= i;
    }

    fn init_state(&mut self) {
        self.r[0] = 1;
        self.r[1] = 1;
        for i in 2..N {
            self.r[i] = self.r[i - 1].wrapping_add(self.r[i - 2]);
        }
        self.konst = INITKONST;
    }

    fn save_state(&mut self) {
        self.init_r = self.r;
    }

    fn reload_state(&mut self) {
        self.r = self.init_r;
    }

    fn gen_konst(&mut self) {
        self.konst = self.r[0];
    }

    fn add_key(&mut self, k: u32) {
        self.r[KEYP] ^= k;
    }

    fn diffuse(&mut self) {
        for _ in 0..FOLD {
            self.cycle();
        }
    }

    fn load_key(&mut self, key: &[u8]) {
        let padding_size = (key.len() + 3) / 4 * 4 - key.len();
        let mut padded = Vec::with_capacity(key.len() + padding_size + 4);
        padded.extend_from_slice(key);
        padded.resize(key.len() + padding_size, 0);
        padded.extend_from_slice(&(key.len() as u32).to_le_bytes());

        let mut i = 0;
        while i < padded.len() {
            let word = u32::from_le_bytes(padded[i..i + 4].try_into().unwrap());
            self.r[KEYP] ^= word;
            self.cycle();
            i += 4;
        }

        self.crc = self.r;
        self.diffuse();
        for i in 0..N {
            self.r[i] ^= self.crc[i];
        }
    }

    /// Initialize R to the Fibonacci seed, absorb `key`, and snapshot the
    /// resulting state so [`Shannon::nonce`] can cheaply reseed from it.
    pub fn key(&mut self, key: &[u8]) {
        self.init_state();
        self.load_key(key);
        self.gen_konst();
        self.save_state();
        self.nbuf = 0;
    }

    /// Restore the snapshot taken by [`Shannon::key`] and absorb a 32-bit
    /// big-endian nonce as if it were a key.
    pub fn nonce_u32(&mut self, nonce: u32) {
        self.nonce(&nonce.to_be_bytes());
    }

    /// As [`Shannon::nonce_u32`] but for an arbitrary nonce byte string.
    pub fn nonce(&mut self, nonce: &[u8]) {
        self.reload_state();
        self.konst = INITKONST;
        self.load_key(nonce);
        self.gen_konst();
        self.nbuf = 0;
    }

    /// Encrypt `buf` in place, MACing the plaintext as it is consumed.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        let mut i = 0usize;
        let mut n = buf.len();

        if self.nbuf != 0 {
            while self.nbuf != 0 && n != 0 {
                self.mbuf ^= (buf[i] as u32) << (32 - self.nbuf);
                buf[i] ^= ((self.sbuf >> (32 - self.nbuf)) & 0xff) as u8;
                i += 1;
                self.nbuf -= 8;
                n -= 1;
            }
            if self.nbuf != 0 {
                return;
            }
            self.mac_func(self.mbuf);
        }

        let j = n & !0x03;
        let end = i + j;
        while i < end {
            self.cycle();
            let mut t = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
            self.mac_func(t);
            t ^= self.sbuf;
            buf[i..i + 4].copy_from_slice(&t.to_le_bytes());
            i += 4;
        }

        let mut n = n & 0x03;
        if n != 0 {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            while self.nbuf != 0 && n != 0 {
                self.mbuf ^= (buf[i] as u32) << (32 - self.nbuf);
                buf[i] ^= ((self.sbuf >> (32 - self.nbuf)) & 0xff) as u8;
                i += 1;
                self.nbuf -= 8;
                n -= 1;
            }
        }
    }

    /// Decrypt `buf` in place, MACing the recovered plaintext.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        let mut i = 0usize;
        let mut n = buf.len();

        if self.nbuf != 0 {
            while self.nbuf != 0 && n != 0 {
                buf[i] ^= ((self.sbuf >> (32 - self.nbuf)) & 0xff) as u8;
                self.mbuf ^= (buf[i] as u32) << (32 - self.nbuf);
                i += 1;
                self.nbuf -= 8;
                n -= 1;
            }
            if self.nbuf != 0 {
                return;
            }
            self.mac_func(self.mbuf);
        }

        let j = n & !0x03;
        let end = i + j;
        while i < end {
            self.cycle();
            let mut t = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
            t ^= self.sbuf;
            self.mac_func(t);
            buf[i..i + 4].copy_from_slice(&t.to_le_bytes());
            i += 4;
        }

        let mut n = n & 0x03;
        if n != 0 {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            while self.nbuf != 0 && n != 0 {
                buf[i] ^= ((self.sbuf >> (32 - self.nbuf)) & 0xff) as u8;
                self.mbuf ^= (buf[i] as u32) << (32 - self.nbuf);
                i += 1;
                self.nbuf -= 8;
                n -= 1;
            }
        }
    }

    /// Absorb any residual partial word, fold the CRC into R, diffuse,
    /// and emit `n` bytes of keystream as a MAC. `n` is normally 4.
    pub fn finish(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n.max(4)];
        out.truncate(n);

        if self.nbuf != 0 {
            self.mac_func(self.mbuf);
        }

        self.cycle();
        self.add_key(INITKONST ^ (self.nbuf << 3));
        self.nbuf = 0;

        for j in 0..N {
            self.r[j] ^= self.crc[j];
        }
        self.diffuse();

        let mut i = 0usize;
        let mut remaining = n;
        while remaining > 0 {
            self.cycle();
            if remaining >= 4 {
                out[i..i + 4].copy_from_slice(&self.sbuf.to_le_bytes());
                remaining -= 4;
                i += 4;
            } else {
                let bytes = self.sbuf.to_le_bytes();
                out[i..i + remaining].copy_from_slice(&bytes[..remaining]);
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shannon_known_answer() {
        let mut sh = Shannon::new();
        sh.key(b"test key 128bits");
        sh.nonce_u32(0);
        let mut buf = [0u8; 20];
        sh.encrypt(&mut buf);
        assert_eq!(hex::encode(buf), "4d7ed39cb695d96acf529770ec7dccbeae2b6f8c");
        let mac = sh.finish(4);
        assert_eq!(hex::encode(mac), "70c00684");
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = b"another session key!";
        let mut enc = Shannon::new();
        enc.key(key);
        enc.nonce_u32(7);
        let mut dec = Shannon::new();
        dec.key(key);
        dec.nonce_u32(7);

        let original = b"a packet payload that is not a multiple of four bytes!";
        let mut buf = original.to_vec();
        enc.encrypt(&mut buf);
        assert_ne!(&buf[..], &original[..]);
        dec.decrypt(&mut buf);
        assert_eq!(&buf[..], &original[..]);

        let enc_mac = enc.finish(4);
        let dec_mac = dec.finish(4);
        assert_eq!(enc_mac, dec_mac);
    }
}
