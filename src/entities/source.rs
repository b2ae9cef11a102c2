//! Radar data sources and the read-only source catalog.
//!
//! A source publishes one image every `interval_seconds`. Its `url_template`
//! is a strftime pattern evaluated in UTC, with `{id}` replaced by the source id:
//!
//! ```text
//! https://radar.example.com/{id}/%Y%m%d%H%M.png
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{RadarError, Result};

fn default_format() -> String {
    "png".to_string()
}

/// One data provider / coverage area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(alias = "url")]
    pub url_template: String,
    pub interval_seconds: u32,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<char>,
    /// Local image drawn underneath every frame (map, borders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<PathBuf>,
}

impl Source {
    pub fn interval(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.interval_seconds))
    }

    /// Render the URL of the frame published at `timestamp`.
    pub fn url_for(&self, timestamp: DateTime<Utc>) -> Result<String> {
        let template = self.url_template.replace("{id}", &self.id);
        let mut url = String::with_capacity(template.len() + 8);
        write!(url, "{}", timestamp.format(&template)).map_err(|_| {
            RadarError::config(format!(
                "source '{}': cannot render url template '{}'",
                self.id, self.url_template
            ))
        })?;
        Ok(url)
    }

    /// Check a single source definition.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RadarError::config("source with empty id"));
        }
        // Ids end up in cache file names
        if self.id.contains(['/', '\\', '.', '%']) || self.id.chars().any(char::is_whitespace) {
            return Err(RadarError::config(format!(
                "source id '{}' must not contain path separators, dots, '%' or whitespace",
                self.id
            )));
        }
        // Whole minutes dividing the hour: the clamp grid restarts every hour
        // and stepping back one interval must land on it again
        if self.interval_seconds == 0
            || self.interval_seconds % 60 != 0
            || 3600 % self.interval_seconds != 0
        {
            return Err(RadarError::config(format!(
                "source '{}': interval_seconds must be a whole number of minutes dividing the hour (got {})",
                self.id, self.interval_seconds
            )));
        }
        if self.format.trim().is_empty() {
            return Err(RadarError::config(format!("source '{}': empty image format", self.id)));
        }
        if self.url_template.trim().is_empty() {
            return Err(RadarError::config(format!("source '{}': empty url template", self.id)));
        }
        if StrftimeItems::new(&self.url_template).any(|item| matches!(item, Item::Error)) {
            return Err(RadarError::config(format!(
                "source '{}': invalid strftime specifier in '{}'",
                self.id, self.url_template
            )));
        }
        Ok(())
    }
}

/// Ordered, validated set of sources keyed by id. Loaded once, read-only after.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: IndexMap<String, Source>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        if sources.is_empty() {
            return Err(RadarError::config("no sources configured"));
        }

        let mut map: IndexMap<String, Source> = IndexMap::with_capacity(sources.len());
        for source in sources {
            source.validate()?;
            if let Some(key) = source.shortcut
                && let Some(other) = map.values().find(|s| s.shortcut == Some(key))
            {
                return Err(RadarError::config(format!(
                    "shortcut '{}' used by both '{}' and '{}'",
                    key, other.id, source.id
                )));
            }
            if map.contains_key(&source.id) {
                return Err(RadarError::config(format!("duplicate source id '{}'", source.id)));
            }
            map.insert(source.id.clone(), source);
        }

        Ok(Self { sources: map })
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    /// Look up a source by id, failing with `UnknownSource`.
    pub fn require(&self, id: &str) -> Result<&Source> {
        self.get(id).ok_or_else(|| RadarError::UnknownSource(id.to_string()))
    }

    pub fn by_shortcut(&self, key: char) -> Option<&Source> {
        self.sources.values().find(|s| s.shortcut == Some(key))
    }

    /// First configured source.
    pub fn first(&self) -> Option<&Source> {
        self.sources.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
