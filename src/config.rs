//! Run configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `NUTRIMELT` using `__` as the section
//! separator (e.g. `NUTRIMELT__API__API_KEY`). The resulting [`Settings`] is
//! passed explicitly to the client, cache and sink constructors.

use crate::error::ConfigError;
use crate::melt::MeltConfig;
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "nutrimelt.toml";

/// FoodData Central API root
pub const DEFAULT_BASE_URL: &str = "https://api.nal.usda.gov/fdc/v1";

/// Records per page served by `/foods/list`
pub const DEFAULT_PAGE_SIZE: usize = 50;

const ENV_PREFIX: &str = "NUTRIMELT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub sink: SinkSettings,
    pub melt: MeltConfig,
}

/// Upstream API access and pagination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub page_size: usize,
    /// Pause between page requests
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
    /// Stop once this many records have been collected across all data types
    pub max_records: Option<usize>,
    /// Data type facets to fetch in order; empty fetches everything unfiltered
    pub data_types: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay_ms: 200,
            timeout_secs: 30,
            max_records: None,
            data_types: Vec::new(),
        }
    }
}

impl ApiSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Raw record cache location and freshness window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub path: PathBuf,
    /// Cache older than this is refetched; unset means the cache never expires
    pub ttl_hours: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            path: PathBuf::from("food.json"),
            ttl_hours: None,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_hours.map(|hours| Duration::from_secs(hours * 3600))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// One SQLite database holding both tables
    #[default]
    Sqlite,
    /// A directory of JSON Lines files, one per table
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub kind: SinkKind,
    /// Database file for `sqlite`, output directory for `jsonl`
    pub path: PathBuf,
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings {
            kind: SinkKind::Sqlite,
            path: PathBuf::from("food.db"),
        }
    }
}

impl Settings {
    /// Load settings from `path` (required) or `nutrimelt.toml` (optional), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(Self::environment())
            .build()?
            .try_deserialize::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without consulting the environment
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make a run misbehave rather than fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "api.page_size",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("api.data_types")
            .with_list_parse_key("melt.parent_columns")
    }
}
