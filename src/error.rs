//! Error types for the frame cache and playback engine.
//!
//! `FetchError` is what the fetch primitive reports for a single URL.
//! `RadarError` is what the cache, resolver and scheduler surface to callers.
//! Application glue (config files, CLI, logging setup) uses `anyhow` instead.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T, E = RadarError> = std::result::Result<T, E>;

/// Failure of a single remote fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("payload too small: {size} bytes (minimum {min})")]
    TooSmall { size: usize, min: usize },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("cannot store download: {0}")]
    Io(#[from] std::io::Error),

    /// A concurrent request for the same frame already failed.
    #[error("concurrent load failed: {0}")]
    Concurrent(String),
}

/// Errors surfaced by the cache, resolver and scheduler.
#[derive(Debug, Error)]
pub enum RadarError {
    #[error("fetch failed for {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("no frame for '{source_id}' at or before {desired} (searched back {lookback_minutes} min)")]
    FrameUnavailable {
        source_id: String,
        desired: DateTime<Utc>,
        lookback_minutes: i64,
    },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("cannot seek while playing")]
    SeekWhilePlaying,

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl RadarError {
    pub fn config(msg: impl Into<String>) -> Self {
        RadarError::ConfigInvalid(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RadarError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a backward search may skip past this error and try an older slot.
    ///
    /// Per-frame problems (network, bad payload, unreadable file) are local to one
    /// slot. Configuration problems affect every slot and abort the search.
    pub fn is_slot_local(&self) -> bool {
        matches!(
            self,
            RadarError::FetchFailed { .. } | RadarError::Decode { .. } | RadarError::Io { .. }
        )
    }
}
