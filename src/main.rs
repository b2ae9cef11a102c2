use radarloop::cli::Args;
use radarloop::config::{self, AppConfig, PathConfig};
use radarloop::console::{self, Command, Flow};
use radarloop::core::{
    Clock, DownloadTracker, FrameResolver, HttpFetcher, ImageCache, PlaybackScheduler, SystemClock,
    Fetcher, Workers,
};
use radarloop::display::{FrameWriter, LogStatus};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

/// Longest the driver sleeps between polls; bounds how late a download-driven
/// interval change is noticed.
const MAX_IDLE: Duration = Duration::from_millis(250);

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("reqwest", log::LevelFilter::Info) // Suppress connection pool spam
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("reqwest", log::LevelFilter::Info)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Forward stdin lines to the driver loop. The channel closes on EOF.
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("radarloop-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("stdin closed");
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;

    info!("radarloop {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::config_file(config::CONFIG_FILE, &path_config));
    info!("Config path: {}", config_path.display());

    let mut app_config = AppConfig::load_or_init(&config_path)?;
    if let Some(minutes) = args.loop_minutes {
        app_config.loop_minutes = minutes;
    }
    let catalog = app_config.catalog().context("Invalid configuration")?;
    let source = app_config
        .initial_source(&catalog, args.source.as_deref())
        .context("Invalid startup source")?
        .clone();
    let catalog = Arc::new(catalog);

    let cache_dir = app_config.resolve_cache_dir(&path_config);
    info!("Frame cache: {}", cache_dir.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracker = Arc::new(DownloadTracker::new(Arc::new(LogStatus)));
    let transport = HttpFetcher::new(FETCH_TIMEOUT).context("Failed to create HTTP client")?;
    let cache = Arc::new(
        ImageCache::new(
            &cache_dir,
            Arc::clone(&catalog),
            Fetcher::new(Arc::new(transport)),
            tracker.clone(),
            Arc::clone(&clock),
        )
        .context("Failed to open frame cache")?,
    );

    match cache.evict_older_than(app_config.max_cache_age()) {
        Ok(evicted) => debug!("Startup eviction: {} files", evicted.files),
        Err(e) => warn!("Startup eviction failed: {}", e),
    }

    // Prefetch is network bound: a few threads are plenty
    let num_workers = (num_cpus::get() / 2).clamp(1, 4);
    let workers = Arc::new(Workers::new(num_workers).context("Failed to start worker threads")?);
    debug!("Prefetch workers: {}", workers.threads());

    let resolver = FrameResolver::new(Arc::clone(&cache), app_config.max_lookback());
    let mut scheduler = PlaybackScheduler::new(
        resolver,
        source,
        app_config.scheduler_settings(),
        Arc::clone(&clock),
        tracker,
        Box::new(FrameWriter::new(args.output.clone())),
    )
    .with_workers(workers);

    if args.autoplay
        && let Err(e) = scheduler.start()
    {
        error!("Autoplay failed: {}", e);
    }

    let mut commands = spawn_stdin_reader()?;
    let mut shown: u64 = 0;

    loop {
        let wait = scheduler
            .next_deadline()
            .map(|due| (due - clock.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE);

        match commands.recv_timeout(wait) {
            Ok(line) => match line.parse::<Command>() {
                Ok(command) => match command.apply(&mut scheduler) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => warn!("{}: {}", line.trim(), e),
                },
                Err(e) => warn!("{}", e),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Piped input ran out: keep going only while there is playback to drive
                if scheduler.next_deadline().is_none() {
                    break;
                }
                commands = crossbeam_channel::never();
            }
        }

        match scheduler.update() {
            Ok(true) => {
                shown += 1;
                if args.ticks.is_some_and(|limit| shown >= limit) {
                    info!("Presented {} frames, exiting", shown);
                    break;
                }
            }
            Ok(false) => {}
            Err(e) => warn!("{}", e),
        }
    }

    info!("{}", console::status_line(&scheduler));
    let stats = cache.stats();
    info!(
        "Cache: {} frames ({} KiB) decoded, {} memory hits, {} disk hits, {} fetches, {} failures ({:.0}% hit rate)",
        cache.len(),
        cache.memory_bytes() / 1024,
        stats.memory_hits(),
        stats.disk_hits(),
        stats.fetches(),
        stats.failures(),
        stats.hit_rate() * 100.0
    );
    Ok(())
}
