//! Backward-fallback frame resolution.
//!
//! Sources publish with a lag, so the slot for "now" is often not there yet.
//! The resolver tries the clamped slot for the desired time and then steps
//! back one interval at a time until a frame turns up or the lookback bound
//! is exhausted.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, trace};

use crate::core::cache::ImageCache;
use crate::entities::{Frame, FrameKey, Source};
use crate::error::{RadarError, Result};

#[derive(Debug, Clone)]
pub struct FrameResolver {
    cache: Arc<ImageCache>,
    max_lookback: TimeDelta,
}

impl FrameResolver {
    pub fn new(cache: Arc<ImageCache>, max_lookback: TimeDelta) -> Self {
        Self {
            cache,
            max_lookback: max_lookback.max(TimeDelta::zero()),
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn max_lookback(&self) -> TimeDelta {
        self.max_lookback
    }

    /// Newest available frame at or before `desired`, within the default lookback.
    pub fn resolve(&self, source: &Source, desired: DateTime<Utc>, allow_fetch_errors: bool) -> Result<Frame> {
        self.resolve_within(source, desired, self.max_lookback, allow_fetch_errors)
    }

    /// Newest available frame in `[clamp(desired) - lookback, clamp(desired)]`.
    ///
    /// Only the first slot honours `allow_fetch_errors`; older slots are
    /// probes and never report. A failing slot never aborts the search unless
    /// the error concerns the source itself (unknown id, broken template).
    pub fn resolve_within(
        &self,
        source: &Source,
        desired: DateTime<Utc>,
        lookback: TimeDelta,
        allow_fetch_errors: bool,
    ) -> Result<Frame> {
        let mut key = FrameKey::new(source, desired);
        let oldest = key.timestamp - lookback;
        let mut probe = allow_fetch_errors;

        while key.timestamp >= oldest {
            match self.cache.get_or_fetch(&key, probe) {
                Ok(Some(image)) => {
                    trace!("Resolved {} for desired {}", key, desired);
                    return Ok(Frame {
                        timestamp: key.timestamp,
                        source_id: key.source_id,
                        image,
                    });
                }
                Ok(None) => trace!("No frame at {}", key),
                Err(e) if e.is_slot_local() => debug!("Skipping {}: {}", key, e),
                Err(e) => return Err(e),
            }
            probe = true;
            key = key.previous(source);
        }

        Err(RadarError::FrameUnavailable {
            source_id: source.id.clone(),
            desired,
            lookback_minutes: lookback.num_minutes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::fetcher::Fetcher;
    use crate::core::testing::{MockFetch, RecordingObserver, png_bytes, radar_source, ts};
    use crate::entities::SourceCatalog;

    fn setup() -> (tempfile::TempDir, FrameResolver, Arc<MockFetch>, Arc<RecordingObserver>, Source) {
        let dir = tempfile::tempdir().unwrap();
        let source = radar_source("nl", 300);
        let catalog = Arc::new(SourceCatalog::new(vec![source.clone()]).unwrap());
        let mock = Arc::new(MockFetch::default());
        let observer = Arc::new(RecordingObserver::default());
        let cache = ImageCache::new(
            dir.path(),
            catalog,
            Fetcher::new(mock.clone()),
            observer.clone(),
            Arc::new(ManualClock::new(ts(2024, 1, 1, 12, 0))),
        )
        .unwrap();
        let resolver = FrameResolver::new(Arc::new(cache), TimeDelta::minutes(30));
        (dir, resolver, mock, observer, source)
    }

    #[test]
    fn test_exact_slot() {
        let (_dir, resolver, mock, _obs, source) = setup();
        mock.publish(&source, ts(2024, 1, 1, 10, 5), png_bytes(1));

        let frame = resolver.resolve(&source, ts(2024, 1, 1, 10, 5), false).unwrap();
        assert_eq!(frame.timestamp, ts(2024, 1, 1, 10, 5));
        assert_eq!(frame.source_id, "nl");
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn test_backward_search_order() {
        let (_dir, resolver, mock, _obs, source) = setup();
        let t = ts(2024, 1, 1, 10, 30);
        mock.publish(&source, t - TimeDelta::seconds(600), png_bytes(1));
        mock.publish(&source, t - TimeDelta::seconds(900), png_bytes(2));

        let frame = resolver.resolve(&source, t, true).unwrap();
        assert_eq!(frame.timestamp, t - TimeDelta::seconds(600));
        assert_eq!(
            mock.calls(),
            vec![
                source.url_for(t).unwrap(),
                source.url_for(t - TimeDelta::seconds(300)).unwrap(),
                source.url_for(t - TimeDelta::seconds(600)).unwrap(),
            ]
        );
    }

    #[test]
    fn test_clamps_then_falls_back() {
        let (_dir, resolver, mock, _obs, source) = setup();
        mock.publish(&source, ts(2024, 1, 1, 10, 0), png_bytes(1));

        let frame = resolver.resolve(&source, ts(2024, 1, 1, 10, 7), true).unwrap();
        assert_eq!(frame.timestamp, ts(2024, 1, 1, 10, 0));
        assert_eq!(mock.calls()[0], source.url_for(ts(2024, 1, 1, 10, 5)).unwrap());
    }

    #[test]
    fn test_lookback_bound() {
        let (_dir, resolver, mock, _obs, source) = setup();
        mock.publish(&source, ts(2024, 1, 1, 9, 0), png_bytes(1));

        let err = resolver
            .resolve_within(&source, ts(2024, 1, 1, 10, 0), TimeDelta::minutes(15), true)
            .unwrap_err();
        assert!(matches!(err, RadarError::FrameUnavailable { lookback_minutes: 15, .. }));
        // 10:00, 09:55, 09:50, 09:45
        assert_eq!(mock.calls().len(), 4);
    }

    #[test]
    fn test_only_first_slot_reports_errors() {
        let (_dir, resolver, mock, observer, source) = setup();
        mock.publish(&source, ts(2024, 1, 1, 9, 50), png_bytes(1));

        let frame = resolver.resolve(&source, ts(2024, 1, 1, 10, 0), false).unwrap();
        assert_eq!(frame.timestamp, ts(2024, 1, 1, 9, 50));
        assert_eq!(observer.errors().len(), 1);
    }
}
