//! Cancellable deadline slot for the playback timers.
//!
//! The scheduler has two timers: the recurring animation timer and the one-shot
//! seek debounce timer. Both live in one `TimerSlot`, so arming either replaces
//! the other and the two can never fire against each other.
//!
//! Nothing runs in the background. The driver loop calls `poll(now)`; when the
//! deadline has passed the slot reports which timer fired. Recurring timers
//! re-arm themselves, one-shots clear.
//!
//! ```ignore
//! slot.arm_once(now, 150);      // scrub: resolve frame after 150ms of quiet
//! slot.arm_once(now + 50, 150); // further scrub: previous one-shot is gone
//!
//! // In update loop:
//! if let Some(TimerKind::Seek) = slot.poll(clock.now()) {
//!     show_seek_target();
//! }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use log::trace;

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Recurring frame-advance timer
    Animation,
    /// One-shot debounce after a manual seek
    Seek,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    kind: TimerKind,
    due: DateTime<Utc>,
    period_ms: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct TimerSlot {
    armed: Option<Armed>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the recurring animation timer, replacing whatever was armed.
    pub fn arm_recurring(&mut self, now: DateTime<Utc>, period_ms: u64) {
        self.armed = Some(Armed {
            kind: TimerKind::Animation,
            due: now + TimeDelta::milliseconds(period_ms as i64),
            period_ms: Some(period_ms),
        });
        trace!("TimerSlot: recurring every {}ms", period_ms);
    }

    /// Arm the one-shot seek timer, replacing whatever was armed.
    pub fn arm_once(&mut self, now: DateTime<Utc>, delay_ms: u64) {
        self.armed = Some(Armed {
            kind: TimerKind::Seek,
            due: now + TimeDelta::milliseconds(delay_ms as i64),
            period_ms: None,
        });
        trace!("TimerSlot: one-shot in {}ms", delay_ms);
    }

    /// Change the period of an armed recurring timer without losing progress:
    /// the next deadline becomes the earlier of the old one and `now + period`.
    /// Does nothing unless the animation timer is armed.
    pub fn retime(&mut self, now: DateTime<Utc>, period_ms: u64) {
        let Some(armed) = self.armed else { return };
        if armed.kind != TimerKind::Animation {
            return;
        }
        let due = armed.due.min(now + TimeDelta::milliseconds(period_ms as i64));
        self.armed = Some(Armed {
            due,
            period_ms: Some(period_ms),
            ..armed
        });
        trace!("TimerSlot: retimed to {}ms", period_ms);
    }

    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            trace!("TimerSlot: cancelled {:?}", armed.kind);
        }
    }

    /// Report the timer that is due at `now`, if any.
    ///
    /// A recurring timer that fell behind (slow fetch inside a tick) is pushed
    /// to `now + period` rather than firing a burst of catch-up ticks.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<TimerKind> {
        let armed = self.armed?;
        if now < armed.due {
            return None;
        }

        match armed.period_ms {
            Some(period_ms) => {
                let period = TimeDelta::milliseconds(period_ms as i64);
                let mut next = armed.due + period;
                if next <= now {
                    next = now + period;
                }
                self.armed = Some(Armed { due: next, ..armed });
            }
            None => self.armed = None,
        }
        Some(armed.kind)
    }

    pub fn kind(&self) -> Option<TimerKind> {
        self.armed.map(|a| a.kind)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn due(&self) -> Option<DateTime<Utc>> {
        self.armed.map(|a| a.due)
    }

    /// Period of the armed recurring timer.
    pub fn period_ms(&self) -> Option<u64> {
        self.armed.and_then(|a| a.period_ms)
    }
}
