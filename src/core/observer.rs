//! Collaborator interfaces injected into the cache and scheduler.
//!
//! - `StatusObserver`: download start/stop and leveled messages
//! - `DisplaySink`: receives the frame to paint and redraw requests
//! - `DownloadTracker`: a `StatusObserver` wrapper that counts downloads in
//!   flight so the scheduler can slow its timer while the network is busy

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::Level;

use crate::entities::{Frame, FrameImage};

/// Receives download and error notifications.
pub trait StatusObserver: Send + Sync {
    /// Called with `true` when a fetch starts and `false` when it ends.
    fn downloading(&self, active: bool);

    /// Leveled status message.
    fn message(&self, level: Level, text: &str);

    fn error(&self, text: &str) {
        self.message(Level::Error, text);
    }

    fn warn(&self, text: &str) {
        self.message(Level::Warn, text);
    }
}

/// Paints frames. Owned by the scheduler.
pub trait DisplaySink: Send {
    /// New composition inputs: the source background and the current frame.
    fn present(&mut self, background: Option<&FrameImage>, current: Option<&Frame>);

    /// The current frame changed and should be repainted.
    fn request_redraw(&mut self);
}

/// Counts in-flight downloads and forwards every notification.
pub struct DownloadTracker {
    active: AtomicUsize,
    inner: Arc<dyn StatusObserver>,
}

impl DownloadTracker {
    pub fn new(inner: Arc<dyn StatusObserver>) -> Self {
        Self {
            active: AtomicUsize::new(0),
            inner,
        }
    }

    /// Number of fetches currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn in_progress(&self) -> bool {
        self.active() > 0
    }
}

impl std::fmt::Debug for DownloadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTracker")
            .field("active", &self.active())
            .finish()
    }
}

impl StatusObserver for DownloadTracker {
    fn downloading(&self, active: bool) {
        if active {
            self.active.fetch_add(1, Ordering::AcqRel);
        } else {
            // Saturating: an unmatched `false` must not wrap
            let _ = self
                .active
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        self.inner.downloading(active);
    }

    fn message(&self, level: Level, text: &str) {
        self.inner.message(level, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::RecordingObserver;

    #[test]
    fn test_tracker_counts_and_forwards() {
        let inner = Arc::new(RecordingObserver::default());
        let tracker = DownloadTracker::new(inner.clone());

        tracker.downloading(true);
        tracker.downloading(true);
        assert_eq!(tracker.active(), 2);
        tracker.downloading(false);
        assert!(tracker.in_progress());
        tracker.downloading(false);
        assert!(!tracker.in_progress());

        // Unmatched stop stays at zero
        tracker.downloading(false);
        assert_eq!(tracker.active(), 0);

        tracker.error("boom");
        assert_eq!(inner.downloads(), vec![true, true, false, false, false]);
        assert_eq!(inner.errors(), vec!["boom".to_string()]);
    }
}
