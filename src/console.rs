//! Line commands for the headless player.
//!
//! Every command maps onto one scheduler transition, so stdin, tests and any
//! future front end drive playback the same way.

use std::str::FromStr;

use chrono::TimeDelta;
use log::info;

use crate::core::scheduler::PlaybackScheduler;
use crate::error::{RadarError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Toggle,
    /// Slider grabbed: pause, then seek.
    Drag(f64),
    /// Seek while stopped or paused.
    Seek(f64),
    /// Slider released: resume if a drag paused playback.
    Release,
    Older,
    Newer,
    Source(String),
    /// Source by its single-character shortcut.
    Shortcut(char),
    LoopMinutes(u32),
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err("empty command".to_string());
        };
        let arg = parts.next();

        let fraction = |arg: Option<&str>| -> std::result::Result<f64, String> {
            let text = arg.ok_or_else(|| format!("'{}' needs a position between 0 and 1", word))?;
            text.parse::<f64>().map_err(|_| format!("bad position '{}'", text))
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "play" | "start" => Command::Play,
            "stop" => Command::Stop,
            "toggle" | "p" => Command::Toggle,
            "seek" => Command::Seek(fraction(arg)?),
            "drag" => Command::Drag(fraction(arg)?),
            "release" => Command::Release,
            "older" | "prev" | "[" => Command::Older,
            "newer" | "next" | "]" => Command::Newer,
            "source" => {
                let id = arg.ok_or("'source' needs a source id")?;
                Command::Source(id.to_string())
            }
            "loop" => {
                let text = arg.ok_or("'loop' needs a duration in minutes")?;
                let minutes = text
                    .parse::<u32>()
                    .map_err(|_| format!("bad loop duration '{}'", text))?;
                Command::LoopMinutes(minutes)
            }
            "status" => Command::Status,
            "quit" | "exit" | "q" => Command::Quit,
            _ => {
                let mut chars = word.chars();
                match (chars.next(), chars.next()) {
                    (Some(key), None) => Command::Shortcut(key),
                    _ => return Err(format!("unknown command '{}'", word)),
                }
            }
        };
        Ok(command)
    }
}

/// What the driver loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Command {
    pub fn apply(&self, scheduler: &mut PlaybackScheduler) -> Result<Flow> {
        match self {
            Command::Play => scheduler.start()?,
            Command::Stop => scheduler.stop(),
            Command::Toggle => scheduler.toggle()?,
            Command::Drag(fraction) => {
                scheduler.pause_for_seek();
                scheduler.manual_seek(*fraction)?;
            }
            Command::Seek(fraction) => scheduler.manual_seek(*fraction)?,
            Command::Release => {
                scheduler.resume_after_seek();
            }
            Command::Older => {
                scheduler.step_older()?;
            }
            Command::Newer => {
                scheduler.step_newer()?;
            }
            Command::Source(id) => scheduler.select_source(id)?,
            Command::Shortcut(key) => {
                let id = scheduler
                    .catalog()
                    .by_shortcut(*key)
                    .map(|s| s.id.clone())
                    .ok_or_else(|| RadarError::UnknownSource(key.to_string()))?;
                scheduler.select_source(&id)?;
            }
            Command::LoopMinutes(minutes) => {
                scheduler.set_loop_duration(TimeDelta::minutes(i64::from(*minutes)))
            }
            Command::Status => info!("{}", status_line(scheduler)),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

/// One-line summary of the playback state.
pub fn status_line(scheduler: &PlaybackScheduler) -> String {
    let shown = scheduler
        .current_frame()
        .map(|f| f.timestamp.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[{}] {:?} step {}/{} ({:.0}%) frame {} ({}ms/frame)",
        scheduler.source().id,
        scheduler.mode(),
        scheduler.current_step(),
        scheduler.total_steps(),
        scheduler.position() * 100.0,
        shown,
        scheduler.frame_interval_ms()
    )
}
