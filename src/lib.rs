//! # spotclient
//!
//! A Rust client for the Spotify access-point wire protocol: session
//! transport and reconnection, the Mercury request/pub-sub multiplexer,
//! audio-key exchange, CDN-backed chunked streaming, and the content
//! feeder that ties metadata, quality selection, and storage resolve into
//! a single playable stream.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use spotclient::{Credentials, ContentFeeder, PlayableId, PlayerConfig, Session, SessionConfig};
//!
//! fn main() -> spotclient::Result<()> {
//!     let credentials = Credentials::UserPass {
//!         username: "user".to_string(),
//!         password: "pass".to_string(),
//!     };
//!     let session = Session::connect(SessionConfig::default(), credentials)?;
//!     let feeder = ContentFeeder::new(session, PlayerConfig::default());
//!     let id = PlayableId::from_uri("spotify:track:6rqhFgbbKwnb9MLmUQDhG6")?;
//!     let loaded = feeder.load(&id)?;
//!     println!("opened stream, {} bytes", loaded.stream.size());
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`session`] - access-point transport, handshake, reconnection
//! - [`mercury`] - the request/sub/pub-sub multiplexer
//! - [`audio_key`] - per-file AES key exchange
//! - [`api`] - `spclient` HTTPS surface: resolver, bearer/client-token auth, metadata
//! - [`cdn`] - ranged chunk fetch and decryption
//! - [`stream`] - the seekable chunked stream built on top of [`cdn`]
//! - [`feeder`] - orchestrates the above into a [`feeder::LoadedStream`]
//! - [`metadata`] - ids, quality tiers, and format classification
//! - [`config`] - session/player configuration and persisted credentials

pub mod api;
pub mod audio_key;
pub mod cdn;
pub mod config;
pub mod crypto;
pub mod error;
pub mod feeder;
pub mod mercury;
pub mod metadata;
pub mod proto;
pub mod session;
pub mod stream;

pub use config::{Credentials, PlayerConfig, SessionConfig, StoredCredentials};
pub use error::{Error, Result};
pub use feeder::{ContentFeeder, LoadedContent, LoadedStream};
pub use metadata::{AudioFile, FormatTag, PlayableId, Quality};
pub use session::Session;
