//! Content feeder: orchestrates a play request end to end — metadata,
//! quality/format selection, storage resolve, audio key, and CDN stream
//! open, grounded on `PlayableContentFeeder.py` and `CdnFeedHelper.py`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::ApiClient;
use crate::cdn::CdnFile;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::metadata::{self, FormatTag, PlayableId, Quality, SuperAudioFormat};
use crate::proto::{self, Episode, Track};
use crate::session::Session;
use crate::stream::{ChunkFetcher, ChunkedStream};

/// The four normalization floats stored at byte offset 144 of an audio
/// file's container.
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    pub track_gain_db: f32,
    pub track_peak: f32,
    pub album_gain_db: f32,
    pub album_peak: f32,
}

/// Which encoded variant and quality tier was actually selected.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub file_id: Vec<u8>,
    pub format: FormatTag,
    pub requested_quality: Quality,
}

/// The metadata record a loaded stream was opened for.
#[derive(Debug, Clone)]
pub enum LoadedContent {
    Track(Track),
    Episode(Episode),
}

/// The result of a successful `ContentFeeder::load`: a ready-to-read
/// stream plus the context needed to interpret it.
pub struct LoadedStream {
    pub content: LoadedContent,
    pub stream: ChunkedStream,
    pub normalization: Option<Normalization>,
    pub metrics: Metrics,
}

/// Offset of the normalization block within an audio file's container.
const NORMALIZATION_OFFSET: usize = 144;
/// Number of header bytes to discard before the decoder-facing container
/// begins.
const HEADER_SIZE: usize = 0xA7;

fn parse_normalization(first_chunk: &[u8]) -> Option<Normalization> {
    if first_chunk.len() < NORMALIZATION_OFFSET + 16 {
        return None;
    }
    let block = &first_chunk[NORMALIZATION_OFFSET..NORMALIZATION_OFFSET + 16];
    let read_f32 = |slice: &[u8]| f32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]);
    Some(Normalization {
        track_gain_db: read_f32(&block[0..4]),
        track_peak: read_f32(&block[4..8]),
        album_gain_db: read_f32(&block[8..12]),
        album_peak: read_f32(&block[12..16]),
    })
}

fn to_format_tag(format: i32) -> Option<FormatTag> {
    use proto::AudioFormat::*;
    match proto::AudioFormat::try_from(format).ok()? {
        OggVorbis96 => Some(FormatTag::OggVorbis96),
        OggVorbis160 => Some(FormatTag::OggVorbis160),
        OggVorbis320 => Some(FormatTag::OggVorbis320),
        Mp396 => Some(FormatTag::Mp396),
        Mp3160 => Some(FormatTag::Mp3160),
        Mp3160Enc => Some(FormatTag::Mp3160Enc),
        Mp3256 => Some(FormatTag::Mp3256),
        Mp3320 => Some(FormatTag::Mp3320),
        Aac24 => Some(FormatTag::Aac24),
        Aac48 => Some(FormatTag::Aac48),
        Aac24Norm => Some(FormatTag::Aac24Norm),
        FlacFlac => Some(FormatTag::FlacFlac),
        FlacFlac24Bit => Some(FormatTag::FlacFlac24Bit),
    }
}

fn lower_tier(tier: Quality) -> Option<Quality> {
    match tier {
        Quality::LOSSLESS => Some(Quality::VERY_HIGH),
        Quality::VERY_HIGH => Some(Quality::HIGH),
        Quality::HIGH => Some(Quality::NORMAL),
        Quality::NORMAL => None,
    }
}

/// Picks an [`proto::AudioFile`] from a track/episode's file list,
/// filtering by quality tier and preferring a configured codec family
/// among survivors, relaxing the tier when nothing matches.
pub struct AudioQualityPicker;

impl AudioQualityPicker {
    pub fn get_file(files: &[proto::AudioFile], requested: Quality) -> Result<metadata::AudioFile> {
        let mut tier = requested;
        loop {
            let tags = tier.tags();
            let candidates: Vec<(&proto::AudioFile, FormatTag)> = files
                .iter()
                .filter_map(|f| {
                    let tag = to_format_tag(f.format?)?;
                    tags.contains(&tag).then_some((f, tag))
                })
                .collect();

            if !candidates.is_empty() {
                let preferred = if tier == Quality::LOSSLESS {
                    SuperAudioFormat::Flac
                } else {
                    SuperAudioFormat::Vorbis
                };
                let pick = candidates
                    .iter()
                    .find(|(_, tag)| tag.super_format() == preferred)
                    .or_else(|| candidates.first());

                return match pick {
                    Some((file, tag)) => Ok(metadata::AudioFile {
                        file_id: file.file_id.clone().unwrap_or_default(),
                        format: *tag,
                    }),
                    None => Err(Error::FeederError("no file matches requested format".to_string())),
                };
            }

            match lower_tier(tier) {
                Some(next) => {
                    warn!(from = ?tier, to = ?next, "relaxing quality tier, no file matched");
                    tier = next;
                }
                None => return Err(Error::FeederError("no audio file matches any quality tier".to_string())),
            }
        }
    }
}

/// If `track.file` is empty, search its alternatives for one that has
/// files and synthesize a derived track carrying that file set.
pub fn pick_alternative_if_necessary(track: Track) -> Result<Track> {
    if !track.file.is_empty() {
        return Ok(track);
    }
    let alternative = track
        .alternative
        .iter()
        .find(|alt| !alt.file.is_empty())
        .cloned();
    match alternative {
        Some(alt) => Ok(Track {
            gid: track.gid,
            name: track.name,
            file: alt.file,
            alternative: Vec::new(),
        }),
        None => Err(Error::FeederError(format!(
            "track {} has no playable file or alternative",
            track.name.unwrap_or_default()
        ))),
    }
}

struct SessionChunkFetcher {
    session: Session,
    cdn: CdnFile,
    total_size: u64,
}

impl ChunkFetcher for SessionChunkFetcher {
    fn fetch(&self, index: u64) -> Result<Vec<u8>> {
        self.cdn.fetch_chunk(index, self.total_size)
    }

    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        self.session.spawn(job);
    }
}

/// Orchestrates §4.D–§4.G into a single `load` call.
pub struct ContentFeeder {
    session: Session,
    api: ApiClient,
    config: PlayerConfig,
}

impl ContentFeeder {
    pub fn new(session: Session, config: PlayerConfig) -> ContentFeeder {
        ContentFeeder {
            session,
            api: ApiClient::new(),
            config,
        }
    }

    /// Resolve and stream the given id: metadata, quality/format pick,
    /// storage resolve, audio key, CDN open (the last three are skipped
    /// for external episodes, which stream the publisher's URL directly).
    pub fn load(&self, id: &PlayableId) -> Result<LoadedStream> {
        match id {
            PlayableId::Track(gid) => self.load_track(*gid),
            PlayableId::Episode(gid) => self.load_episode(*gid),
            PlayableId::Unsupported { kind, .. } => {
                Err(Error::FeederError(format!("cannot stream a {kind}")))
            }
        }
    }

    fn load_track(&self, gid: [u8; 16]) -> Result<LoadedStream> {
        let metadata = self.api.metadata_for(&self.session, &PlayableId::Track(gid))?;
        let track = match metadata {
            crate::api::Metadata::Track(track) => track,
            crate::api::Metadata::Episode(_) => {
                return Err(Error::FeederError("expected track metadata, got episode".to_string()))
            }
        };

        let track = pick_alternative_if_necessary(track)?;
        let file = AudioQualityPicker::get_file(&track.file, self.config.preferred_quality)?;
        let key = self.session.audio_key().request(&gid, &file.file_id)?;
        let cdn_urls = self.resolve_storage(&file.file_id)?;

        let (first_chunk, _total_size, mut stream) = self.open_cdn_stream(cdn_urls, Some(key))?;
        let normalization = parse_normalization(&first_chunk);
        stream.skip(HEADER_SIZE as u64);

        info!(gid = hex::encode(gid), format = ?file.format, "loaded track stream");
        Ok(LoadedStream {
            content: LoadedContent::Track(track),
            stream,
            normalization,
            metrics: Metrics {
                file_id: file.file_id,
                format: file.format,
                requested_quality: self.config.preferred_quality,
            },
        })
    }

    fn load_episode(&self, gid: [u8; 16]) -> Result<LoadedStream> {
        let metadata = self.api.metadata_for(&self.session, &PlayableId::Episode(gid))?;
        let episode = match metadata {
            crate::api::Metadata::Episode(episode) => episode,
            crate::api::Metadata::Track(_) => {
                return Err(Error::FeederError("expected episode metadata, got track".to_string()))
            }
        };

        if let Some(external_url) = episode.external_url.clone() {
            return self.load_external_episode(episode, external_url);
        }

        let file = AudioQualityPicker::get_file(&episode.file, self.config.preferred_quality)?;
        let key = self.session.audio_key().request(&gid, &file.file_id)?;
        let cdn_urls = self.resolve_storage(&file.file_id)?;

        let (first_chunk, _total_size, mut stream) = self.open_cdn_stream(cdn_urls, Some(key))?;
        let normalization = parse_normalization(&first_chunk);
        stream.skip(HEADER_SIZE as u64);

        info!(gid = hex::encode(gid), "loaded episode stream");
        Ok(LoadedStream {
            content: LoadedContent::Episode(episode),
            stream,
            normalization,
            metrics: Metrics {
                file_id: file.file_id,
                format: file.format,
                requested_quality: self.config.preferred_quality,
            },
        })
    }

    /// External episodes skip quality/storage resolve entirely and
    /// stream the publisher's URL directly, with identity decrypt and
    /// neither normalization parsing nor header skip.
    fn load_external_episode(&self, episode: Episode, url: String) -> Result<LoadedStream> {
        let redirected = self.resolve_redirect(&url)?;
        let cdn = CdnFile::new(vec![redirected], None);
        let (first_chunk, total_size) = cdn.probe()?;
        let fetcher: Arc<dyn ChunkFetcher> = Arc::new(SessionChunkFetcher {
            session: self.session.clone(),
            cdn,
            total_size,
        });
        let stream = ChunkedStream::new(fetcher, total_size, first_chunk, self.config.retry_on_chunk_error);

        info!("loaded external episode stream");
        Ok(LoadedStream {
            content: LoadedContent::Episode(episode),
            stream,
            normalization: None,
            metrics: Metrics {
                file_id: Vec::new(),
                format: FormatTag::Mp3160,
                requested_quality: self.config.preferred_quality,
            },
        })
    }

    fn resolve_redirect(&self, url: &str) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        let response = client.head(url).send()?;
        Ok(response.url().to_string())
    }

    fn resolve_storage(&self, file_id: &[u8]) -> Result<Vec<String>> {
        let hex_id = hex::encode(file_id);
        let resolved = self.api.storage_resolve(&self.session, &hex_id, false)?;
        match resolved.result.and_then(|r| proto::StorageResolveResult::try_from(r).ok()) {
            Some(proto::StorageResolveResult::Cdn) => Ok(resolved.cdnurl),
            Some(other) => Err(Error::UnsupportedStorage(format!("{other:?}"))),
            None => Err(Error::UnsupportedStorage("unrecognized".to_string())),
        }
    }

    fn open_cdn_stream(
        &self,
        cdn_urls: Vec<String>,
        key: Option<[u8; 16]>,
    ) -> Result<(Vec<u8>, u64, ChunkedStream)> {
        let cdn = CdnFile::new(cdn_urls, key);
        let (first_chunk, total_size) = cdn.probe()?;
        let fetcher: Arc<dyn ChunkFetcher> = Arc::new(SessionChunkFetcher {
            session: self.session.clone(),
            cdn,
            total_size,
        });
        let stream = ChunkedStream::new(fetcher, total_size, first_chunk.clone(), self.config.retry_on_chunk_error);
        Ok((first_chunk, total_size, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_file(format: proto::AudioFormat, file_id: Vec<u8>) -> proto::AudioFile {
        proto::AudioFile {
            file_id: Some(file_id),
            format: Some(format as i32),
        }
    }

    #[test]
    fn picks_preferred_super_format_within_tier() {
        let files = vec![
            audio_file(proto::AudioFormat::Mp3160, vec![1]),
            audio_file(proto::AudioFormat::OggVorbis160, vec![2]),
        ];
        let picked = AudioQualityPicker::get_file(&files, Quality::HIGH).unwrap();
        assert_eq!(picked.format, FormatTag::OggVorbis160);
    }

    #[test]
    fn relaxes_tier_when_nothing_matches() {
        let files = vec![audio_file(proto::AudioFormat::OggVorbis96, vec![1])];
        let picked = AudioQualityPicker::get_file(&files, Quality::LOSSLESS).unwrap();
        assert_eq!(picked.format, FormatTag::OggVorbis96);
    }

    #[test]
    fn fails_when_no_file_matches_any_tier() {
        let files: Vec<proto::AudioFile> = Vec::new();
        assert!(AudioQualityPicker::get_file(&files, Quality::HIGH).is_err());
    }

    #[test]
    fn pick_alternative_synthesizes_from_first_usable_alternative() {
        let alt = Track {
            gid: Some(vec![9; 16]),
            name: Some("alt".to_string()),
            file: vec![audio_file(proto::AudioFormat::OggVorbis96, vec![1])],
            alternative: Vec::new(),
        };
        let track = Track {
            gid: Some(vec![1; 16]),
            name: Some("original".to_string()),
            file: Vec::new(),
            alternative: vec![alt],
        };
        let resolved = pick_alternative_if_necessary(track).unwrap();
        assert_eq!(resolved.file.len(), 1);
    }

    #[test]
    fn pick_alternative_fails_when_no_usable_alternative() {
        let track = Track {
            gid: Some(vec![1; 16]),
            name: Some("original".to_string()),
            file: Vec::new(),
            alternative: Vec::new(),
        };
        assert!(pick_alternative_if_necessary(track).is_err());
    }

    #[test]
    fn parses_normalization_block_at_offset_144() {
        let mut chunk = vec![0u8; 200];
        chunk[144..148].copy_from_slice(&1.5f32.to_le_bytes());
        chunk[148..152].copy_from_slice(&0.9f32.to_le_bytes());
        chunk[152..156].copy_from_slice(&2.5f32.to_le_bytes());
        chunk[156..160].copy_from_slice(&0.8f32.to_le_bytes());
        let norm = parse_normalization(&chunk).unwrap();
        assert_eq!(norm.track_gain_db, 1.5);
        assert_eq!(norm.album_peak, 0.8);
    }
}
