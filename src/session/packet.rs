//! The one-byte command codes that tag every encrypted packet.

/// A packet command byte and its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SecretBlock,
    Ping,
    StreamChunk,
    StreamChunkRes,
    ChannelError,
    ChannelAbort,
    RequestKey,
    AesKey,
    AesKeyError,
    Image,
    CountryCode,
    Pong,
    PongAck,
    Pause,
    ProductInfo,
    LegacyWelcome,
    LicenseVersion,
    Login,
    ApWelcome,
    AuthFailure,
    MercuryReq,
    MercurySub,
    MercuryUnsub,
    MercuryEvent,
    TrackEndedTime,
    UnknownDataAllZeros,
    PreferredLocale,
    Unknown0x4f,
    Unknown0x0f,
    Unknown0x10,
}

impl PacketType {
    /// The wire command byte for this packet type.
    pub fn cmd(self) -> u8 {
        use PacketType::*;
        match self {
            SecretBlock => 0x02,
            Ping => 0x04,
            StreamChunk => 0x08,
            StreamChunkRes => 0x09,
            ChannelError => 0x0a,
            ChannelAbort => 0x0b,
            RequestKey => 0x0c,
            AesKey => 0x0d,
            AesKeyError => 0x0e,
            Image => 0x19,
            CountryCode => 0x1b,
            Pong => 0x49,
            PongAck => 0x4a,
            Pause => 0x4b,
            ProductInfo => 0x50,
            LegacyWelcome => 0x69,
            LicenseVersion => 0x76,
            Login => 0xab,
            ApWelcome => 0xac,
            AuthFailure => 0xad,
            MercuryReq => 0xb2,
            MercurySub => 0xb3,
            MercuryUnsub => 0xb4,
            MercuryEvent => 0xb5,
            TrackEndedTime => 0x82,
            UnknownDataAllZeros => 0x1f,
            PreferredLocale => 0x74,
            Unknown0x4f => 0x4f,
            Unknown0x0f => 0x0f,
            Unknown0x10 => 0x10,
        }
    }

    /// Recognize a command byte; unrecognized bytes are logged and
    /// dropped by the caller.
    pub fn parse(cmd: u8) -> Option<PacketType> {
        use PacketType::*;
        [
            SecretBlock,
            Ping,
            StreamChunk,
            StreamChunkRes,
            ChannelError,
            ChannelAbort,
            RequestKey,
            AesKey,
            AesKeyError,
            Image,
            CountryCode,
            Pong,
            PongAck,
            Pause,
            ProductInfo,
            LegacyWelcome,
            LicenseVersion,
            Login,
            ApWelcome,
            AuthFailure,
            MercuryReq,
            MercurySub,
            MercuryUnsub,
            MercuryEvent,
            TrackEndedTime,
            UnknownDataAllZeros,
            PreferredLocale,
            Unknown0x4f,
            Unknown0x0f,
            Unknown0x10,
        ]
        .into_iter()
        .find(|t| t.cmd() == cmd)
    }

    /// Pick the outbound command for a Mercury method name.
    pub fn for_mercury_method(method: &str) -> PacketType {
        match method {
            "SUB" => PacketType::MercurySub,
            "UNSUB" => PacketType::MercuryUnsub,
            _ => PacketType::MercuryReq,
        }
    }
}

/// A decoded packet: a recognized or raw command byte plus its payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The raw command byte (kept even if unrecognized, for logging).
    pub cmd: u8,
    /// The decrypted payload.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet from a known type.
    pub fn new(ty: PacketType, payload: Vec<u8>) -> Packet {
        Packet {
            cmd: ty.cmd(),
            payload,
        }
    }

    /// Whether this packet's command matches a known type.
    pub fn is(&self, ty: PacketType) -> bool {
        self.cmd == ty.cmd()
    }

    /// Resolve this packet's command to a known type, if recognized.
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::parse(self.cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_roundtrips_through_parse() {
        for &ty in &[PacketType::Ping, PacketType::MercuryEvent, PacketType::AesKey] {
            assert_eq!(PacketType::parse(ty.cmd()), Some(ty));
        }
    }

    #[test]
    fn unknown_cmd_is_none() {
        assert_eq!(PacketType::parse(0xff), None);
    }

    #[test]
    fn mercury_method_routing() {
        assert_eq!(PacketType::for_mercury_method("SUB"), PacketType::MercurySub);
        assert_eq!(PacketType::for_mercury_method("UNSUB"), PacketType::MercuryUnsub);
        assert_eq!(PacketType::for_mercury_method("GET"), PacketType::MercuryReq);
    }
}
