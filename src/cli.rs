use clap::Parser;
use std::path::PathBuf;

// Build version with transport info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "HTTP:   reqwest 0.12 (blocking)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless weather radar loop player
///
/// Reads commands from stdin, one per line: play, stop, toggle, seek F,
/// drag F, release, older, newer, source ID, loop MIN, status, quit.
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: radarloop.json in the config directory)
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Source id to start with (default: default_source from the config)
    #[arg(short = 's', long = "source", value_name = "ID")]
    pub source: Option<String>,

    /// Loop duration in minutes (overrides loop_minutes from the config)
    #[arg(short = 'o', long = "loop", value_name = "MINUTES")]
    pub loop_minutes: Option<u32>,

    /// Start playing immediately
    #[arg(short = 'a', long = "autoplay")]
    pub autoplay: bool,

    /// Write the composited current frame to this PNG on every redraw
    #[arg(long = "output", value_name = "PNG")]
    pub output: Option<PathBuf>,

    /// Exit after this many presented frames
    #[arg(long = "ticks", value_name = "N")]
    pub ticks: Option<u64>,

    /// Enable debug logging to file (default: radarloop.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "radarloop", "--source", "nl", "--loop", "120", "-a", "--ticks", "5", "-vv",
        ])
        .unwrap();
        assert_eq!(args.source.as_deref(), Some("nl"));
        assert_eq!(args.loop_minutes, Some(120));
        assert!(args.autoplay);
        assert_eq!(args.ticks, Some(5));
        assert_eq!(args.verbosity, 2);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_log_flag_without_value() {
        let args = Args::try_parse_from(["radarloop", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));

        let args = Args::try_parse_from(["radarloop", "--log", "out.log"]).unwrap();
        assert_eq!(args.log_file, Some(Some(PathBuf::from("out.log"))));
    }
}
