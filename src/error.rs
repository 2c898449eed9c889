//! Error types for the Spotify client.

use thiserror::Error;

/// Main error type for all session, mercury, and content-pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Handshake failed: server signature did not verify, or the peer
    /// returned a framed error during key exchange.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Authentication was rejected by the access point.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A received packet's MAC did not match. Fatal to the session.
    #[error("packet MAC mismatch")]
    MacMismatch,

    /// The session socket was closed, or a fatal I/O error tore it down.
    #[error("session closed")]
    Closed,

    /// A Mercury request completed with a non-2xx status.
    #[error("mercury error: status {0}")]
    MercuryError(u16),

    /// Waiting on a Mercury response exceeded its timeout.
    #[error("mercury request timed out")]
    MercuryTimeout,

    /// An HTTP API call returned a non-200 status.
    #[error("API error: status {0}")]
    StatusCode(u16),

    /// The audio-key manager received an error code from the server.
    #[error("audio key error: code {0}")]
    AudioKeyError(u16),

    /// Waiting for an audio key exceeded its timeout.
    #[error("audio key request timed out")]
    AudioKeyTimeout,

    /// No file matched the requested quality/format, or the track has
    /// no usable alternative.
    #[error("no playable file: {0}")]
    FeederError(String),

    /// `StorageResolveResponse` named a result this client cannot serve.
    #[error("unsupported storage result: {0}")]
    UnsupportedStorage(String),

    /// A chunk exhausted its retry budget.
    #[error("chunk {0} failed after exhausting retries")]
    ChunkError(usize),

    /// The identifier did not match the Spotify URI/id grammar.
    #[error("invalid playable id: {0}")]
    InvalidId(String),

    /// A configured feature has no implementation in this client.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// HTTP request failed.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
