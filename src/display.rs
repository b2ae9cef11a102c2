//! Headless display and status reporting for the binary.
//!
//! `LogStatus` routes observer notifications to the log facade. `FrameWriter`
//! keeps the latest composition and, on redraw, logs it and optionally writes
//! it to a PNG so an external viewer can follow along.

use std::path::PathBuf;

use image::RgbaImage;
use log::{Level, debug, info, log, warn};

use crate::core::fetcher::write_atomic;
use crate::core::observer::{DisplaySink, StatusObserver};
use crate::entities::{Frame, FrameImage};

/// Logs observer notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusObserver for LogStatus {
    fn downloading(&self, active: bool) {
        if active {
            debug!("Download started");
        } else {
            debug!("Download finished");
        }
    }

    fn message(&self, level: Level, text: &str) {
        log!(level, "{}", text);
    }
}

/// Background with the frame drawn over it, top-left aligned.
///
/// Frames are expected to match the background size; a mismatched frame is
/// clipped by the overlay.
pub fn composite(background: Option<&FrameImage>, current: Option<&FrameImage>) -> Option<RgbaImage> {
    match (background, current) {
        (None, None) => None,
        (Some(bg), None) => Some(bg.rgba().clone()),
        (None, Some(frame)) => Some(frame.rgba().clone()),
        (Some(bg), Some(frame)) => {
            let mut canvas = bg.rgba().clone();
            image::imageops::overlay(&mut canvas, frame.rgba(), 0, 0);
            Some(canvas)
        }
    }
}

pub struct FrameWriter {
    output: Option<PathBuf>,
    background: Option<FrameImage>,
    current: Option<Frame>,
    presented: u64,
}

impl FrameWriter {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            background: None,
            current: None,
            presented: 0,
        }
    }

    /// Number of redraws that had a frame to show.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn write_output(&self, path: &std::path::Path) {
        let Some(canvas) = composite(self.background.as_ref(), self.current.as_ref().map(|f| &f.image)) else {
            return;
        };
        let mut bytes = Vec::new();
        let encoded = canvas.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png);
        let written = encoded
            .map_err(|e| e.to_string())
            .and_then(|_| write_atomic(path, &bytes).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!("Cannot write {}: {}", path.display(), e);
        }
    }
}

impl DisplaySink for FrameWriter {
    fn present(&mut self, background: Option<&FrameImage>, current: Option<&Frame>) {
        self.background = background.cloned();
        self.current = current.cloned();
    }

    fn request_redraw(&mut self) {
        match &self.current {
            Some(frame) => {
                self.presented += 1;
                info!("[{}] {}", frame.source_id, frame.timestamp.format("%Y-%m-%d %H:%M UTC"));
            }
            None => debug!("Redraw without frame"),
        }
        if let Some(path) = &self.output {
            self.write_output(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ts;
    use image::Rgba;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> FrameImage {
        FrameImage::from_rgba(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    #[test]
    fn test_composite_overlays_frame() {
        let bg = solid(4, 4, [0, 0, 255, 255]);
        let mut radar = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        radar.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        let radar = FrameImage::from_rgba(radar);

        let out = composite(Some(&bg), Some(&radar)).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        // Transparent radar pixels show the map
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));

        assert!(composite(None, None).is_none());
        assert_eq!(composite(None, Some(&radar)).unwrap().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_writer_saves_png_on_redraw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.png");
        let mut writer = FrameWriter::new(Some(path.clone()));

        // Background alone is written but not counted
        writer.present(Some(&solid(8, 8, [10, 20, 30, 255])), None);
        writer.request_redraw();
        assert_eq!(writer.presented(), 0);
        assert!(path.is_file());

        let frame = Frame {
            timestamp: ts(2024, 1, 1, 10, 0),
            source_id: "nl".to_string(),
            image: solid(8, 8, [200, 0, 0, 255]),
        };
        writer.present(None, Some(&frame));
        writer.request_redraw();
        assert_eq!(writer.presented(), 1);

        let saved = image::open(&path).unwrap().to_rgba8();
        assert_eq!(saved.dimensions(), (8, 8));
        assert_eq!(saved.get_pixel(3, 3), &Rgba([200, 0, 0, 255]));
    }
}
