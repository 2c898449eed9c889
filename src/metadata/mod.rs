//! Identifiers and per-file metadata: [`PlayableId`], [`AudioFile`],
//! [`Quality`], [`StreamId`], and the format classification used to pick
//! among a track's encoded variants.

use crate::crypto::base62;
use crate::error::{Error, Result};

/// Length of a Spotify GID in bytes.
pub const GID_LEN: usize = 16;
/// Length of a base62-encoded Spotify id string.
pub const BASE62_LEN: usize = 22;

/// A playable Spotify entity: a track, an episode, or something this
/// client does not know how to play (still carries its kind and GID so
/// callers can report a useful error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableId {
    /// A song.
    Track([u8; GID_LEN]),
    /// A podcast episode.
    Episode([u8; GID_LEN]),
    /// A recognized URI kind this client cannot stream (album, artist,
    /// show, playlist) or one it does not recognize at all.
    Unsupported {
        /// The URI's `kind` segment, or `"unknown"`.
        kind: String,
        /// The entity's GID.
        gid: [u8; GID_LEN],
    },
}

fn kind_str(kind: &str) -> Result<&'static str> {
    match kind {
        "track" => Ok("track"),
        "episode" => Ok("episode"),
        "album" => Ok("album"),
        "artist" => Ok("artist"),
        "show" => Ok("show"),
        "playlist" => Ok("playlist"),
        other => Err(Error::InvalidId(format!("unrecognized kind: {other}"))),
    }
}

fn gid_array(bytes: Vec<u8>) -> Result<[u8; GID_LEN]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidId("GID is not 16 bytes".to_string()))
}

impl PlayableId {
    /// Parse a `spotify:<kind>:<22 base62 chars>` URI.
    pub fn from_uri(uri: &str) -> Result<PlayableId> {
        let rest = uri
            .strip_prefix("spotify:")
            .ok_or_else(|| Error::InvalidId(format!("not a spotify URI: {uri}")))?;
        let mut parts = rest.splitn(2, ':');
        let kind = parts
            .next()
            .ok_or_else(|| Error::InvalidId(format!("malformed URI: {uri}")))?;
        let id = parts
            .next()
            .ok_or_else(|| Error::InvalidId(format!("malformed URI: {uri}")))?;
        if id.len() != BASE62_LEN {
            return Err(Error::InvalidId(format!(
                "id segment must be {BASE62_LEN} characters: {uri}"
            )));
        }
        let kind = kind_str(kind)?;
        let gid = gid_array(
            base62::decode(id, Some(GID_LEN))
                .ok_or_else(|| Error::InvalidId(format!("invalid base62 id: {id}")))?,
        )?;
        Ok(PlayableId::from_kind_and_gid(kind, gid))
    }

    /// Build from a known kind and a 22-character base62 id.
    pub fn from_base62(kind: &str, base62_id: &str) -> Result<PlayableId> {
        if base62_id.len() != BASE62_LEN {
            return Err(Error::InvalidId(format!(
                "id must be {BASE62_LEN} characters: {base62_id}"
            )));
        }
        let kind = kind_str(kind)?;
        let gid = gid_array(
            base62::decode(base62_id, Some(GID_LEN))
                .ok_or_else(|| Error::InvalidId(format!("invalid base62 id: {base62_id}")))?,
        )?;
        Ok(PlayableId::from_kind_and_gid(kind, gid))
    }

    /// Build from a known kind and a 32-character lowercase hex id.
    pub fn from_hex(kind: &str, hex_id: &str) -> Result<PlayableId> {
        if hex_id.len() != GID_LEN * 2 {
            return Err(Error::InvalidId(format!(
                "hex id must be {} characters: {hex_id}",
                GID_LEN * 2
            )));
        }
        let kind = kind_str(kind)?;
        let bytes =
            hex::decode(hex_id).map_err(|e| Error::InvalidId(format!("invalid hex id: {e}")))?;
        Ok(PlayableId::from_kind_and_gid(kind, gid_array(bytes)?))
    }

    fn from_kind_and_gid(kind: &'static str, gid: [u8; GID_LEN]) -> PlayableId {
        match kind {
            "track" => PlayableId::Track(gid),
            "episode" => PlayableId::Episode(gid),
            other => PlayableId::Unsupported {
                kind: other.to_string(),
                gid,
            },
        }
    }

    /// This id's URI `kind` segment.
    pub fn kind(&self) -> &str {
        match self {
            PlayableId::Track(_) => "track",
            PlayableId::Episode(_) => "episode",
            PlayableId::Unsupported { kind, .. } => kind,
        }
    }

    /// The entity's 16-byte GID.
    pub fn gid(&self) -> &[u8; GID_LEN] {
        match self {
            PlayableId::Track(gid) | PlayableId::Episode(gid) => gid,
            PlayableId::Unsupported { gid, .. } => gid,
        }
    }

    /// The 32-character lowercase hex form of the GID.
    pub fn hex_id(&self) -> String {
        hex::encode(self.gid())
    }

    /// The 22-character base62 form of the GID.
    pub fn base62_id(&self) -> String {
        base62::encode(self.gid(), Some(BASE62_LEN))
    }

    /// Re-serialize to `spotify:<kind>:<22 base62 chars>`. Re-encodes the
    /// GID rather than echoing back whatever string the id was parsed
    /// from, so this always round-trips with [`PlayableId::from_uri`].
    pub fn to_spotify_uri(&self) -> String {
        format!("spotify:{}:{}", self.kind(), self.base62_id())
    }
}

/// Encoded-variant format tags Spotify assigns to an [`AudioFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    OggVorbis96,
    OggVorbis160,
    OggVorbis320,
    Mp396,
    Mp3160,
    Mp3160Enc,
    Mp3256,
    Mp3320,
    Aac24,
    Aac24Norm,
    Aac48,
    FlacFlac,
    FlacFlac24Bit,
}

/// The codec family a [`FormatTag`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperAudioFormat {
    Mp3,
    Vorbis,
    Aac,
    Flac,
}

impl FormatTag {
    /// Classify this tag into its codec family.
    pub fn super_format(self) -> SuperAudioFormat {
        use FormatTag::*;
        match self {
            OggVorbis96 | OggVorbis160 | OggVorbis320 => SuperAudioFormat::Vorbis,
            Mp396 | Mp3160 | Mp3160Enc | Mp3256 | Mp3320 => SuperAudioFormat::Mp3,
            Aac24 | Aac24Norm | Aac48 => SuperAudioFormat::Aac,
            FlacFlac | FlacFlac24Bit => SuperAudioFormat::Flac,
        }
    }
}

/// Ordered playback quality tiers; higher variants are strictly better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Quality {
    NORMAL,
    HIGH,
    VERY_HIGH,
    LOSSLESS,
}

impl Quality {
    /// Format tags acceptable for this tier, most-preferred (by the
    /// caller's chosen [`SuperAudioFormat`]) filtered further upstream in
    /// `feeder::AudioQualityPicker`.
    pub fn tags(self) -> &'static [FormatTag] {
        use FormatTag::*;
        match self {
            Quality::NORMAL => &[OggVorbis96, Mp396],
            Quality::HIGH => &[OggVorbis160, Mp3160, Mp3160Enc, Aac48],
            Quality::VERY_HIGH => &[OggVorbis320, Mp3320, Mp3256, Aac24Norm],
            Quality::LOSSLESS => &[FlacFlac, FlacFlac24Bit],
        }
    }
}

/// A single encoded variant of a track or episode, as returned in
/// metadata.
#[derive(Debug, Clone)]
pub struct AudioFile {
    /// 20-byte opaque file id, used for audio-key requests and storage
    /// resolve.
    pub file_id: Vec<u8>,
    /// The encoded format of this variant.
    pub format: FormatTag,
}

/// Identifies which file a CDN stream or audio-key request is about:
/// exactly one of `file_id` or `episode_gid` is set.
#[derive(Debug, Clone)]
pub enum StreamId {
    /// A specific encoded file.
    File(Vec<u8>),
    /// An external episode, identified only by its GID (no file id —
    /// the publisher serves the raw MP3 directly).
    Episode(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_uri_roundtrips() {
        let uri = "spotify:track:6rqhFgbbKwnb9MLmUQDhG6";
        let id = PlayableId::from_uri(uri).unwrap();
        assert!(matches!(id, PlayableId::Track(_)));
        assert_eq!(id.to_spotify_uri(), uri);
    }

    #[test]
    fn base62_to_uri_roundtrips_for_every_kind() {
        for kind in ["track", "episode", "album", "artist", "show", "playlist"] {
            let base62_id = "6rqhFgbbKwnb9MLmUQDhG6";
            let id = PlayableId::from_base62(kind, base62_id).unwrap();
            assert_eq!(
                id.to_spotify_uri(),
                format!("spotify:{kind}:{base62_id}")
            );
        }
    }

    #[test]
    fn rejects_malformed_uri() {
        assert!(PlayableId::from_uri("not-a-uri").is_err());
        assert!(PlayableId::from_uri("spotify:track:tooshort").is_err());
    }

    #[test]
    fn hex_and_base62_agree() {
        let id = PlayableId::from_base62("track", "6rqhFgbbKwnb9MLmUQDhG6").unwrap();
        let from_hex = PlayableId::from_hex("track", &id.hex_id()).unwrap();
        assert_eq!(id, from_hex);
    }

    #[test]
    fn quality_ordering() {
        assert!(Quality::LOSSLESS > Quality::VERY_HIGH);
        assert!(Quality::HIGH > Quality::NORMAL);
    }
}
