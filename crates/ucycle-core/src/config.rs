use crate::geo::DisplayFilter;
use crate::location::LocationSettings;
use crate::models::{Category, LocationPoint};
use crate::poll::PollSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Priority: CLI > Env (`UCYCLE__SECTION__KEY`) > File > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub directory: DirectoryConfig,
    pub location: LocationConfig,
    pub browse: BrowseConfig,
    pub poll: PollConfig,
    pub notifications: NotificationConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load from the default config file (if any) with env overrides on top
    pub fn load() -> crate::Result<Self> {
        let env = ::config::Environment::with_prefix("UCYCLE")
            .separator("__")
            .try_parsing(true);
        Self::load_from(&Self::config_path()?, env)
    }

    /// Layer `path` (optional) under the given environment source
    pub fn load_from(path: &Path, env: ::config::Environment) -> crate::Result<Self> {
        let layered = ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()).required(false))
            .add_source(env)
            .build()
            .map_err(|e| crate::Error::ConfigError(format!("Failed to read config: {}", e)))?;

        layered
            .try_deserialize()
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save config to disk
    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `<config dir>/ucycle/config.toml`
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?;

        Ok(config_dir.join("ucycle").join("config.toml"))
    }

    /// Registry database, falling back to `<data dir>/ucycle/registry.db`
    pub fn db_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.storage.db_path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?;
        Ok(data_dir.join("ucycle").join("registry.db"))
    }

    pub fn location_settings(&self) -> LocationSettings {
        LocationSettings {
            timeout: Duration::from_secs(self.location.timeout_secs),
            max_age: Duration::from_secs(self.location.max_age_secs),
            default_center: LocationPoint::new(
                self.location.default_latitude,
                self.location.default_longitude,
            ),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll.interval_secs.max(1)),
            nearby_radius_km: self.poll.nearby_radius_km,
        }
    }

    pub fn display_filter(&self) -> DisplayFilter {
        DisplayFilter {
            radius_km: self.browse.radius_km,
            category: self.browse.category,
            favorites_only: self.browse.favorites_only,
            include_inactive: false,
        }
    }

    pub fn notice_duration(&self) -> Duration {
        Duration::from_secs(self.notifications.display_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the item directory, including the `/api` prefix
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001/api".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
    pub timeout_secs: u64,
    /// Cached readings younger than this are reused
    pub max_age_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Penrith NSW
        Self {
            default_latitude: -33.7507,
            default_longitude: 150.6944,
            timeout_secs: 10,
            max_age_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowseConfig {
    pub radius_km: f64,
    pub category: Option<Category>,
    pub favorites_only: bool,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            radius_km: 10.0,
            category: None,
            favorites_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub nearby_radius_km: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            nearby_radius_km: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub display_secs: u64,
    /// Ring the terminal bell with each notice
    pub sound: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            display_secs: 5,
            sound: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}
