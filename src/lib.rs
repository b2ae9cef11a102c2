//! radarloop - weather radar loop player library
//!
//! Re-exports all modules for use by the binary target.

// Core engine (cache, resolver, scheduler, workers)
pub mod core;
pub mod entities;
pub mod error;

// App modules
pub mod cli;
pub mod config;
pub mod console;
pub mod display;

// Re-export commonly used types from core
pub use core::cache::{CacheStats, ImageCache};
pub use core::resolver::FrameResolver;
pub use core::scheduler::{PlaybackMode, PlaybackScheduler, SchedulerSettings};

// Re-export entities
pub use entities::{Frame, FrameImage, FrameKey, Source, SourceCatalog};
pub use error::{FetchError, RadarError};
