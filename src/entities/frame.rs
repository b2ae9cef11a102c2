//! Frame identity and decoded frame images.
//!
//! A frame is addressed by `FrameKey` = (source id, clamped timestamp). Clamping
//! truncates a timestamp down onto the source's publish grid, so every request
//! inside one interval maps to the same key.
//!
//! Decoded pixels live in `FrameImage`, a cheap-to-clone `Arc` handle. The cache
//! keeps one clone per key; callers clone it for the duration of a draw.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;

use super::source::Source;

/// strftime pattern of the timestamp prefix in cache file names.
///
/// Every field is fixed-width and zero-padded so that file names sort
/// lexicographically in timestamp order.
pub const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// Length of a rendered `FILE_STAMP_FORMAT` ("2024-01-01_10-05").
pub const FILE_STAMP_LEN: usize = 16;

const SECONDS_PER_HOUR: i64 = 3600;

/// Truncate `t` within its hour: the seconds past the full hour are rounded
/// down to a multiple of `interval_seconds`, so `minute % (interval / 60) == 0`.
///
/// Sub-second precision is dropped. An interval of 0 only drops sub-seconds;
/// intervals of an hour or more truncate to the full hour.
pub fn clamp(t: DateTime<Utc>, interval_seconds: u32) -> DateTime<Utc> {
    let secs = t.timestamp();
    let hour = secs - secs.rem_euclid(SECONDS_PER_HOUR);
    let into_hour = secs - hour;
    let step = i64::from(interval_seconds.max(1));
    DateTime::from_timestamp(hour + into_hour - into_hour % step, 0).unwrap_or(t)
}

/// Cache key: source plus timestamp clamped to the source grid.
///
/// Ordered by timestamp first so an ordered map can split by age.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
}

impl FrameKey {
    /// Key for the slot of `source` containing `t`.
    pub fn new(source: &Source, t: DateTime<Utc>) -> Self {
        Self {
            timestamp: clamp(t, source.interval_seconds),
            source_id: source.id.clone(),
        }
    }

    /// Lowest possible key at `timestamp` (any real key at that time compares >=).
    pub(crate) fn floor(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            source_id: String::new(),
        }
    }

    /// Key one publish interval earlier.
    pub fn previous(&self, source: &Source) -> Self {
        Self {
            timestamp: self.timestamp - source.interval(),
            source_id: self.source_id.clone(),
        }
    }

    /// On-disk file name: `<YYYY-MM-DD_HH-MM>_<source_id>.<format>`.
    pub fn file_name(&self, format: &str) -> String {
        format!(
            "{}_{}.{}",
            self.timestamp.format(FILE_STAMP_FORMAT),
            self.source_id,
            format
        )
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source_id, self.timestamp.format("%Y-%m-%d %H:%M"))
    }
}

/// Decoded RGBA frame, shared by reference count.
#[derive(Clone)]
pub struct FrameImage {
    pixels: Arc<RgbaImage>,
}

impl FrameImage {
    /// Decode an encoded image (PNG, JPEG, GIF) into RGBA8.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_rgba(decoded.to_rgba8()))
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Approximate memory footprint in bytes.
    pub fn mem(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// True if both handles point at the same decoded buffer.
    pub fn same_buffer(&self, other: &FrameImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A resolved frame: the timestamp actually found plus its image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub image: FrameImage,
}
