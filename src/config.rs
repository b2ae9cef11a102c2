//! Application paths and the JSON configuration file.
//!
//! Directory priority: CLI `--config-dir` → `RADARLOOP_CONFIG_DIR` → local
//! folder (if a `radarloop.json` sits there) → platform dirs from dirs-next.
//!
//! Platform paths:
//! - Linux: ~/.config/radarloop, ~/.local/share/radarloop, ~/.cache/radarloop/frames
//! - macOS: ~/Library/Application Support/radarloop, ~/Library/Caches/radarloop/frames
//! - Windows: %APPDATA%\radarloop, %LOCALAPPDATA%\radarloop\frames

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::TimeDelta;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::scheduler::{DEFAULT_SEEK_DEBOUNCE_MS, SchedulerSettings};
use crate::entities::{Source, SourceCatalog};
use crate::error::RadarError;

pub const APP_NAME: &str = "radarloop";
pub const CONFIG_FILE: &str = "radarloop.json";
pub const LOG_FILE: &str = "radarloop.log";
const CONFIG_DIR_ENV: &str = "RADARLOOP_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (RADARLOOP_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Path of a configuration file.
pub fn config_file(name: &str, paths: &PathConfig) -> PathBuf {
    config_dir(paths).join(name)
}

/// Path of a data file (logs).
pub fn data_file(name: &str, paths: &PathConfig) -> PathBuf {
    data_dir(paths).join(name)
}

/// Default frame cache directory.
///
/// With a custom config dir the cache lives next to it, so a portable setup
/// stays self-contained.
pub fn cache_dir(paths: &PathConfig) -> PathBuf {
    if let Some(dir) = &paths.config_dir {
        return dir.join("frames");
    }
    match dirs_next::cache_dir() {
        Some(dir) => dir.join(APP_NAME).join("frames"),
        None => PathBuf::from("frames"),
    }
}

/// Create the config and data directories if missing.
pub fn ensure_dirs(paths: &PathConfig) -> Result<()> {
    let config = config_dir(paths);
    let data = data_dir(paths);

    std::fs::create_dir_all(&config)
        .with_context(|| format!("Failed to create config directory: {}", config.display()))?;
    if data != config {
        std::fs::create_dir_all(&data)
            .with_context(|| format!("Failed to create data directory: {}", data.display()))?;
    }
    Ok(())
}

fn local_dir() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.join(CONFIG_FILE).is_file().then_some(cwd)
}

fn config_dir(paths: &PathConfig) -> PathBuf {
    if let Some(dir) = &paths.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn data_dir(paths: &PathConfig) -> PathBuf {
    if let Some(dir) = &paths.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::data_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Contents of `radarloop.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<Source>,
    /// Source selected at startup; first source if unset.
    pub default_source: Option<String>,
    pub loop_minutes: u32,
    pub max_cache_age_hours: u32,
    /// Default backward search bound for frame lookups.
    pub max_lookback_minutes: u32,
    pub prefetch: bool,
    pub seek_debounce_ms: u64,
    /// Frame cache directory; platform cache dir if unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            default_source: None,
            loop_minutes: 60,
            max_cache_age_hours: 24,
            max_lookback_minutes: 30,
            prefetch: true,
            seek_debounce_ms: DEFAULT_SEEK_DEBOUNCE_MS,
            cache_dir: None,
        }
    }
}

impl AppConfig {
    /// Configuration written on first run: one placeholder source to edit.
    pub fn sample() -> Self {
        Self {
            sources: vec![Source {
                id: "example".to_string(),
                display_name: "Example radar".to_string(),
                url_template: "https://radar.example.com/{id}/%Y%m%d%H%M.png".to_string(),
                interval_seconds: 300,
                format: "png".to_string(),
                shortcut: Some('1'),
                background: None,
            }],
            default_source: Some("example".to_string()),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse configuration JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_json(&text).with_context(|| format!("In {}", path.display()))?;
        debug!("Loaded {} sources from {}", config.sources.len(), path.display());
        Ok(config)
    }

    /// Load `path`, writing `AppConfig::sample()` there first if it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let sample = Self::sample();
            sample.save(path)?;
            info!("Wrote sample configuration to {}", path.display());
            return Ok(sample);
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Validate the sources and build the catalog.
    pub fn catalog(&self) -> Result<SourceCatalog, RadarError> {
        if self.loop_minutes == 0 {
            return Err(RadarError::config("loop_minutes must be positive"));
        }
        let catalog = SourceCatalog::new(self.sources.clone())?;
        if let Some(id) = &self.default_source
            && catalog.get(id).is_none()
        {
            return Err(RadarError::config(format!("default_source '{}' is not a configured source", id)));
        }
        Ok(catalog)
    }

    /// Startup source: `requested`, else `default_source`, else the first one.
    pub fn initial_source<'a>(
        &self,
        catalog: &'a SourceCatalog,
        requested: Option<&str>,
    ) -> Result<&'a Source, RadarError> {
        match requested.or(self.default_source.as_deref()) {
            Some(id) => catalog.require(id),
            None => catalog
                .first()
                .ok_or_else(|| RadarError::config("no sources configured")),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            loop_duration: TimeDelta::minutes(i64::from(self.loop_minutes)),
            seek_debounce_ms: self.seek_debounce_ms,
            max_cache_age: self.max_cache_age(),
            prefetch: self.prefetch,
        }
    }

    pub fn max_cache_age(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.max_cache_age_hours))
    }

    pub fn max_lookback(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.max_lookback_minutes))
    }

    /// Configured cache dir, or the platform default.
    pub fn resolve_cache_dir(&self, paths: &PathConfig) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| cache_dir(paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(dir: &Path) -> PathConfig {
        PathConfig {
            config_dir: Some(dir.to_path_buf()),
        }
    }

    #[test]
    fn test_paths_with_custom_dir() {
        let paths = custom(Path::new("/custom"));
        assert_eq!(config_file("radarloop.json", &paths), PathBuf::from("/custom/radarloop.json"));
        assert_eq!(data_file(LOG_FILE, &paths), PathBuf::from("/custom/radarloop.log"));
        assert_eq!(cache_dir(&paths), PathBuf::from("/custom/frames"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let paths = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(paths.config_dir, Some(PathBuf::from("/from-cli")));
    }

    #[test]
    fn test_load_or_init_writes_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = AppConfig::load_or_init(&path).unwrap();
        assert!(path.is_file());
        assert_eq!(config, AppConfig::sample());

        // Second call reads what the first one wrote
        let again = AppConfig::load_or_init(&path).unwrap();
        assert_eq!(again, config);
        assert!(again.catalog().is_ok());
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = AppConfig::from_json(
            r#"{
                "sources": [
                    { "id": "nl", "name": "Netherlands", "url": "https://r.example/{id}/%Y%m%d%H%M.png",
                      "interval_seconds": 300, "shortcut": "n" }
                ],
                "loop_minutes": 120
            }"#,
        )
        .unwrap();

        assert_eq!(config.loop_minutes, 120);
        assert_eq!(config.max_cache_age_hours, 24);
        assert_eq!(config.seek_debounce_ms, 150);
        assert!(config.prefetch);
        assert_eq!(config.sources[0].format, "png");
        assert_eq!(config.sources[0].display_name, "Netherlands");

        let settings = config.scheduler_settings();
        assert_eq!(settings.loop_duration, TimeDelta::hours(2));
        assert_eq!(settings.max_cache_age, TimeDelta::hours(24));

        let catalog = config.catalog().unwrap();
        assert_eq!(config.initial_source(&catalog, None).unwrap().id, "nl");
        assert!(matches!(
            config.initial_source(&catalog, Some("xx")),
            Err(RadarError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = AppConfig::sample();
        config.default_source = Some("missing".to_string());
        assert!(matches!(config.catalog(), Err(RadarError::ConfigInvalid(_))));

        let mut config = AppConfig::sample();
        config.sources[0].interval_seconds = 90;
        assert!(matches!(config.catalog(), Err(RadarError::ConfigInvalid(_))));

        let mut config = AppConfig::sample();
        config.sources.clear();
        config.default_source = None;
        assert!(matches!(config.catalog(), Err(RadarError::ConfigInvalid(_))));

        let mut config = AppConfig::sample();
        config.loop_minutes = 0;
        assert!(matches!(config.catalog(), Err(RadarError::ConfigInvalid(_))));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("parse"));
    }

    #[test]
    fn test_cache_dir_override() {
        let paths = custom(Path::new("/cfg"));
        let mut config = AppConfig::sample();
        assert_eq!(config.resolve_cache_dir(&paths), PathBuf::from("/cfg/frames"));
        config.cache_dir = Some(PathBuf::from("/var/tmp/frames"));
        assert_eq!(config.resolve_cache_dir(&paths), PathBuf::from("/var/tmp/frames"));
    }
}
