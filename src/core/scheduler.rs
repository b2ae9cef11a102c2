//! Loop playback scheduler: step counter, timers and frame hand-off.
//!
//! **Architecture**: the scheduler owns playback state only. Frames come from
//! the `FrameResolver` (and through it the shared `ImageCache`); painting is
//! the `DisplaySink`'s job. Timer, slider and keyboard triggers all end up in
//! the same few transition methods below.
//!
//! # Step Model
//!
//! A loop is `total_steps + 1` frames, counted backward from the anchor:
//! step 0 is the anchor (newest frame), step `total_steps` the oldest. Playing
//! walks from the oldest frame towards step 0, then re-anchors on the newest
//! published frame and starts over.
//!
//! ```text
//! total_steps = loop_duration / source.interval
//! timestamp(step) = anchor - step * source.interval
//! ```
//!
//! # Timing Model
//!
//! A whole loop plays in about 12 seconds: `max(100, 12000 / total_steps)` ms
//! per frame. While any download is running the period is forced to 1 s so
//! ticks never stack up behind the network.
//!
//! `update()` is called by the driver loop; it polls the timer slot against
//! the clock and dispatches `tick()` or the debounced seek.
//!
//! # States
//!
//! - `Stopped`: no timer, except a pending seek debounce
//! - `Playing`: recurring animation timer armed
//! - `PausedForSeek`: a slider drag interrupted playback; release resumes it

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, trace, warn};

use crate::core::clock::Clock;
use crate::core::observer::{DisplaySink, DownloadTracker, StatusObserver};
use crate::core::resolver::FrameResolver;
use crate::core::timer::{TimerKind, TimerSlot};
use crate::core::workers::Workers;
use crate::entities::{Frame, FrameImage, FrameKey, Source, SourceCatalog};
use crate::error::{RadarError, Result};

/// Floor of the per-frame interval.
pub const MIN_FRAME_INTERVAL_MS: u64 = 100;

/// Target wall time for one pass over the loop.
pub const LOOP_PLAYTIME_MS: u64 = 12_000;

/// Per-frame interval while downloads are in progress.
pub const DOWNLOAD_FRAME_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_SEEK_DEBOUNCE_MS: u64 = 150;

/// Extra lookback for the anchor search on top of the loop duration.
const ANCHOR_GRACE_MINUTES: i64 = 30;

/// An anchor older than this is a loop left over from before a suspend.
const STALE_ANCHOR_MINUTES: i64 = 24 * 60 + 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Stopped,
    Playing,
    PausedForSeek,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub loop_duration: TimeDelta,
    pub seek_debounce_ms: u64,
    /// Cache entries older than this are evicted on every new anchor.
    pub max_cache_age: TimeDelta,
    /// Warm the cache with the whole loop on the worker pool.
    pub prefetch: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            loop_duration: TimeDelta::hours(1),
            seek_debounce_ms: DEFAULT_SEEK_DEBOUNCE_MS,
            max_cache_age: TimeDelta::hours(24),
            prefetch: true,
        }
    }
}

/// Number of steps in a loop of `loop_duration` for a source interval.
pub fn total_steps_for(loop_duration: TimeDelta, interval_seconds: u32) -> u32 {
    let secs = loop_duration.num_seconds().max(0) as u64;
    let steps = secs / u64::from(interval_seconds.max(1));
    u32::try_from(steps).unwrap_or(u32::MAX)
}

/// Per-frame interval in ms for a loop of `total_steps`.
pub fn base_interval_ms(total_steps: u32) -> u64 {
    (LOOP_PLAYTIME_MS / u64::from(total_steps.max(1))).max(MIN_FRAME_INTERVAL_MS)
}

fn is_stale(anchor: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    anchor < now - TimeDelta::minutes(STALE_ANCHOR_MINUTES)
}

fn load_background(source: &Source) -> Option<FrameImage> {
    let path = source.background.as_ref()?;
    match image::open(path) {
        Ok(img) => Some(FrameImage::from_rgba(img.to_rgba8())),
        Err(e) => {
            warn!("Background for '{}' unavailable ({}): {}", source.id, path.display(), e);
            None
        }
    }
}

pub struct PlaybackScheduler {
    resolver: FrameResolver,
    source: Source,
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
    observer: Arc<DownloadTracker>,
    display: Box<dyn DisplaySink>,
    workers: Option<Arc<Workers>>,

    mode: PlaybackMode,
    anchor: Option<DateTime<Utc>>,
    total_steps: u32,
    current_step: u32,
    base_interval_ms: u64,
    timer: TimerSlot,

    current: Option<Frame>,
    background: Option<FrameImage>,
}

impl PlaybackScheduler {
    /// `observer` must be the same tracker the cache reports downloads to.
    pub fn new(
        resolver: FrameResolver,
        source: Source,
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
        observer: Arc<DownloadTracker>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let total_steps = total_steps_for(settings.loop_duration, source.interval_seconds);
        let background = load_background(&source);
        info!(
            "Scheduler initialized: source '{}', {} steps, {}ms/frame",
            source.id,
            total_steps,
            base_interval_ms(total_steps)
        );

        Self {
            resolver,
            source,
            settings,
            clock,
            observer,
            display,
            workers: None,
            mode: PlaybackMode::Stopped,
            anchor: None,
            total_steps,
            current_step: 0,
            base_interval_ms: base_interval_ms(total_steps),
            timer: TimerSlot::new(),
            current: None,
            background,
        }
    }

    /// Prefetch loop frames on `workers`.
    pub fn with_workers(mut self, workers: Arc<Workers>) -> Self {
        self.workers = Some(workers);
        self
    }

    // === Accessors ===

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.mode == PlaybackMode::Playing
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// All sources the scheduler can switch to.
    pub fn catalog(&self) -> &Arc<SourceCatalog> {
        self.resolver.cache().catalog()
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    /// Last frame handed to the display.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Slider position: 0.0 = oldest, 1.0 = newest.
    pub fn position(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        1.0 - f64::from(self.current_step) / f64::from(self.total_steps)
    }

    pub fn base_interval_ms(&self) -> u64 {
        self.base_interval_ms
    }

    /// Interval the animation timer should run at right now.
    pub fn frame_interval_ms(&self) -> u64 {
        if self.observer.in_progress() {
            DOWNLOAD_FRAME_INTERVAL_MS
        } else {
            self.base_interval_ms
        }
    }

    pub fn timer_kind(&self) -> Option<TimerKind> {
        self.timer.kind()
    }

    pub fn timer_period_ms(&self) -> Option<u64> {
        self.timer.period_ms()
    }

    /// When `update()` next has work to do, if any timer is armed.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timer.due()
    }

    // === Transitions ===

    /// Stopped/PausedForSeek -> Playing. No-op when already playing.
    ///
    /// Without a usable anchor this first searches for the newest frame; if
    /// none is found playback does not start and `FrameUnavailable` is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.mode == PlaybackMode::Playing {
            return Ok(());
        }

        let now = self.clock.now();
        if self.anchor.is_none_or(|anchor| is_stale(anchor, now)) {
            if let Err(e) = self.reanchor(now) {
                self.observer.error(&format!("Cannot start playback: {}", e));
                return Err(e);
            }
            self.current_step = self.total_steps;
            self.show_current_step();
        }

        self.mode = PlaybackMode::Playing;
        self.arm_animation(now);
        debug!("Playback started at step {}/{}", self.current_step, self.total_steps);
        Ok(())
    }

    /// Always stops (doesn't toggle). Cancels the armed timer.
    pub fn stop(&mut self) {
        if self.mode != PlaybackMode::Stopped {
            self.mode = PlaybackMode::Stopped;
            self.timer.cancel();
            debug!("Playback stopped at step {}", self.current_step);
        }
    }

    pub fn toggle(&mut self) -> Result<()> {
        if self.is_playing() {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    /// Playing -> PausedForSeek (slider grabbed). Returns whether it transitioned.
    pub fn pause_for_seek(&mut self) -> bool {
        if self.mode != PlaybackMode::Playing {
            return false;
        }
        self.timer.cancel();
        self.mode = PlaybackMode::PausedForSeek;
        trace!("Paused for seek at step {}", self.current_step);
        true
    }

    /// PausedForSeek -> Playing (slider released). Returns whether it transitioned.
    pub fn resume_after_seek(&mut self) -> bool {
        if self.mode != PlaybackMode::PausedForSeek {
            return false;
        }
        // Drop a pending seek one-shot before the animation timer takes the slot
        self.timer.cancel();
        self.mode = PlaybackMode::Playing;
        let now = self.clock.now();
        self.arm_animation(now);
        trace!("Resumed after seek at step {}", self.current_step);
        true
    }

    /// Move to `fraction` of the loop (0.0 = oldest, 1.0 = newest).
    ///
    /// The frame itself is resolved when the debounce timer fires, so a drag
    /// across the slider fetches once instead of once per position.
    pub fn manual_seek(&mut self, fraction: f64) -> Result<()> {
        if self.mode == PlaybackMode::Playing {
            return Err(RadarError::SeekWhilePlaying);
        }
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let step = (f64::from(self.total_steps) * (1.0 - fraction)).round() as u32;
        self.current_step = step.min(self.total_steps);

        let now = self.clock.now();
        self.timer.arm_once(now, self.settings.seek_debounce_ms);
        trace!("Seek to {:.3} -> step {}", fraction, self.current_step);
        Ok(())
    }

    /// One step towards the oldest frame, wrapping to the newest. Stops playback.
    pub fn step_older(&mut self) -> Result<bool> {
        self.step_by(1)
    }

    /// One step towards the newest frame, wrapping to the oldest. Stops playback.
    pub fn step_newer(&mut self) -> Result<bool> {
        self.step_by(-1)
    }

    fn step_by(&mut self, delta: i64) -> Result<bool> {
        self.stop();
        // A manual step supersedes any pending seek
        self.timer.cancel();
        if self.anchor.is_none() {
            let now = self.clock.now();
            self.reanchor(now)
                .inspect_err(|e| self.observer.error(&e.to_string()))?;
            self.current_step = 0;
        }

        let span = i64::from(self.total_steps) + 1;
        self.current_step = (i64::from(self.current_step) + delta).rem_euclid(span) as u32;
        Ok(self.show_current_step())
    }

    /// Change the loop length. Restarts the timer if playing.
    pub fn set_loop_duration(&mut self, loop_duration: TimeDelta) {
        self.settings.loop_duration = loop_duration.max(TimeDelta::zero());
        self.recompute_steps();
        info!(
            "Loop duration {} min: {} steps, {}ms/frame",
            self.settings.loop_duration.num_minutes(),
            self.total_steps,
            self.base_interval_ms
        );
    }

    /// Switch to another source. Resets anchor and steps; the cache, including
    /// frames of the previous source, is left alone.
    pub fn select_source(&mut self, id: &str) -> Result<()> {
        let source = self.resolver.cache().catalog().require(id)?.clone();
        if source.id == self.source.id {
            return Ok(());
        }

        info!("Switching source '{}' -> '{}'", self.source.id, source.id);
        if let Some(workers) = &self.workers {
            workers.bump_epoch();
        }
        self.background = load_background(&source);
        self.source = source;
        self.anchor = None;
        self.current_step = 0;
        self.current = None;
        self.recompute_steps();

        self.display.present(self.background.as_ref(), None);
        self.display.request_redraw();
        Ok(())
    }

    /// Poll timers and run whatever is due. Returns whether a frame was shown.
    pub fn update(&mut self) -> Result<bool> {
        let now = self.clock.now();
        if self.mode == PlaybackMode::Playing {
            let wanted = self.frame_interval_ms();
            if self.timer.period_ms().is_some_and(|period| period != wanted) {
                trace!("Frame interval -> {}ms", wanted);
                self.timer.retime(now, wanted);
            }
        }

        match self.timer.poll(now) {
            Some(TimerKind::Animation) => self.tick(),
            Some(TimerKind::Seek) => self.show_seek_target(),
            None => Ok(false),
        }
    }

    /// Advance one frame. Called by the animation timer while playing.
    ///
    /// At step 0 the loop restarts on a fresh anchor. A stale anchor (process
    /// was suspended for a day) halts playback instead, without an error.
    pub fn tick(&mut self) -> Result<bool> {
        if self.mode != PlaybackMode::Playing {
            return Ok(false);
        }

        let now = self.clock.now();
        if self.current_step == 0 {
            if let Some(anchor) = self.anchor
                && is_stale(anchor, now)
            {
                info!("Loop anchor {} is stale, halting playback", anchor);
                self.current_step = 0;
                self.stop();
                return Ok(false);
            }

            match self.reanchor(now) {
                Ok(_) => {}
                Err(e) if self.anchor.is_some() => {
                    warn!("Re-anchor failed, replaying current loop: {}", e);
                }
                Err(e) => {
                    self.observer.error(&format!("Cannot start playback: {}", e));
                    self.stop();
                    return Err(e);
                }
            }
            self.current_step = self.total_steps;
        } else {
            self.current_step -= 1;
        }

        Ok(self.show_current_step())
    }

    // === Internals ===

    fn arm_animation(&mut self, now: DateTime<Utc>) {
        let period = self.frame_interval_ms();
        self.timer.arm_recurring(now, period);
    }

    fn recompute_steps(&mut self) {
        self.total_steps = total_steps_for(self.settings.loop_duration, self.source.interval_seconds);
        self.current_step = self.current_step.min(self.total_steps);
        self.base_interval_ms = base_interval_ms(self.total_steps);

        if self.mode == PlaybackMode::Playing {
            // Stop then start: nothing may fire on the old period
            let now = self.clock.now();
            self.timer.cancel();
            self.arm_animation(now);
        }
    }

    fn step_timestamp(&self, anchor: DateTime<Utc>, step: u32) -> DateTime<Utc> {
        anchor - self.source.interval() * i32::try_from(step).unwrap_or(i32::MAX)
    }

    /// Find the newest frame within one loop plus grace and make it the anchor.
    fn reanchor(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let lookback = self.settings.loop_duration + TimeDelta::minutes(ANCHOR_GRACE_MINUTES);
        let newest = self.resolver.resolve_within(&self.source, now, lookback, true)?;
        let anchor = newest.timestamp;

        if self.anchor != Some(anchor) {
            info!("Loop anchor for '{}': {}", self.source.id, anchor);
            self.anchor = Some(anchor);
            self.evict_expired();
            self.prefetch_loop(anchor);
        }
        Ok(anchor)
    }

    fn evict_expired(&self) {
        // Never evict frames the current loop still needs
        let keep = self.settings.loop_duration + TimeDelta::minutes(ANCHOR_GRACE_MINUTES);
        let max_age = self.settings.max_cache_age.max(keep);
        if let Err(e) = self.resolver.cache().evict_older_than(max_age) {
            warn!("Cache eviction failed: {}", e);
        }
    }

    fn prefetch_loop(&self, anchor: DateTime<Utc>) {
        if !self.settings.prefetch {
            return;
        }
        let Some(workers) = &self.workers else { return };

        let epoch = workers.bump_epoch();
        // Oldest first: that is the playback order after a re-anchor
        for step in (1..=self.total_steps).rev() {
            let key = FrameKey::new(&self.source, self.step_timestamp(anchor, step));
            let cache = Arc::clone(self.resolver.cache());
            workers.execute_with_epoch(epoch, move || {
                if let Err(e) = cache.get_or_fetch(&key, true) {
                    debug!("Prefetch of {} failed: {}", key, e);
                }
            });
        }
        trace!("Queued {} prefetch jobs (epoch {})", self.total_steps, epoch);
    }

    fn show_seek_target(&mut self) -> Result<bool> {
        if self.anchor.is_none() {
            let now = self.clock.now();
            self.reanchor(now)
                .inspect_err(|e| self.observer.error(&e.to_string()))?;
        }
        Ok(self.show_current_step())
    }

    /// Resolve the frame for the current step and hand it to the display.
    /// On failure the previous frame stays up.
    fn show_current_step(&mut self) -> bool {
        let Some(anchor) = self.anchor else { return false };
        let desired = self.step_timestamp(anchor, self.current_step);

        match self.resolver.resolve(&self.source, desired, false) {
            Ok(frame) => {
                trace!("Step {} -> {}", self.current_step, frame.timestamp);
                self.current = Some(frame);
                self.display.present(self.background.as_ref(), self.current.as_ref());
                self.display.request_redraw();
                true
            }
            Err(e) => {
                debug!("Keeping previous frame at step {}: {}", self.current_step, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("source", &self.source.id)
            .field("mode", &self.mode)
            .field("anchor", &self.anchor)
            .field("step", &self.current_step)
            .field("total_steps", &self.total_steps)
            .finish_non_exhaustive()
    }
}
