//! Test doubles shared by the core test modules.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::Level;

use crate::core::fetcher::Fetch;
use crate::core::observer::{DisplaySink, StatusObserver};
use crate::entities::{Frame, FrameImage, Source};
use crate::error::FetchError;

pub fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn radar_source(id: &str, interval_seconds: u32) -> Source {
    Source {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        url_template: "mock://{id}/%Y%m%d%H%M.png".to_string(),
        interval_seconds,
        format: "png".to_string(),
        shortcut: None,
        background: None,
    }
}

/// A 32x32 noise PNG, comfortably above the minimum payload size.
pub fn png_bytes(seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let img = image::RgbaImage::from_fn(32, 32, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [a, b, c, _] = state.to_le_bytes();
        image::Rgba([a, b, c, 255])
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    assert!(buf.len() > 1000);
    buf
}

/// In-memory `Fetch` with a call log.
#[derive(Default)]
pub struct MockFetch {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockFetch {
    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    /// Make the frame of `source` at `timestamp` available.
    pub fn publish(&self, source: &Source, timestamp: DateTime<Utc>, body: Vec<u8>) {
        self.insert(&source.url_for(timestamp).unwrap(), body);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetch for MockFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// Records every observer notification.
#[derive(Default)]
pub struct RecordingObserver {
    downloads: Mutex<Vec<bool>>,
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingObserver {
    pub fn downloads(&self) -> Vec<bool> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == Level::Error)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl StatusObserver for RecordingObserver {
    fn downloading(&self, active: bool) {
        self.downloads.lock().unwrap().push(active);
    }

    fn message(&self, level: Level, text: &str) {
        self.messages.lock().unwrap().push((level, text.to_string()));
    }
}

/// What a `RecordingDisplay` saw, shared with the test body.
#[derive(Default)]
pub struct DisplayLog {
    pub presented: Vec<Option<DateTime<Utc>>>,
    pub redraws: usize,
    pub had_background: Vec<bool>,
}

pub struct RecordingDisplay {
    log: Arc<Mutex<DisplayLog>>,
}

impl RecordingDisplay {
    pub fn new() -> (Self, Arc<Mutex<DisplayLog>>) {
        let log = Arc::new(Mutex::new(DisplayLog::default()));
        (Self { log: Arc::clone(&log) }, log)
    }
}

impl DisplaySink for RecordingDisplay {
    fn present(&mut self, background: Option<&FrameImage>, current: Option<&Frame>) {
        let mut log = self.log.lock().unwrap();
        log.presented.push(current.map(|f| f.timestamp));
        log.had_background.push(background.is_some());
    }

    fn request_redraw(&mut self) {
        self.log.lock().unwrap().redraws += 1;
    }
}
