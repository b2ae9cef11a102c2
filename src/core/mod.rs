//! Core engine modules - cache, resolver, scheduler, workers
//!
//! These modules form the playback engine, independent of any display.

pub mod cache;
pub mod clock;
pub mod fetcher;
pub mod observer;
pub mod resolver;
pub mod scheduler;
pub mod timer;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use cache::{CacheStats, Eviction, ImageCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fetcher::{Fetch, Fetcher, HttpFetcher, MIN_PAYLOAD_BYTES};
pub use observer::{DisplaySink, DownloadTracker, StatusObserver};
pub use resolver::FrameResolver;
pub use scheduler::{PlaybackMode, PlaybackScheduler, SchedulerSettings};
pub use timer::{TimerKind, TimerSlot};
pub use workers::Workers;
