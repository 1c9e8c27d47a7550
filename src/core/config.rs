/// Dashboard configuration
///
/// Stored as TOML in `<config_dir>/homedash/config.toml` unless a path is
/// given on the command line. A missing file yields defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::docker::ContainerSettings;
use crate::core::weather::Location;

pub const API_KEY_ENV: &str = "HOMEDASH_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub log_level: String,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub weather: WeatherConfig,
    pub notes: NotesConfig,
    pub containers: ContainersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between samples
    pub collection_interval: u64,
    /// Seconds of history retained
    pub max_history_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    pub forecast_hours: usize,
    pub cache_ttl_minutes: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersConfig {
    pub stop_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            weather: WeatherConfig::default(),
            notes: NotesConfig::default(),
            containers: ContainersConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_key: None,
            enable_cors: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collection_interval: 5,
            max_history_duration: 1800,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            latitude: 51.5074,
            longitude: -0.1278,
            location_name: "London".to_string(),
            forecast_hours: 12,
            cache_ttl_minutes: 30,
            request_timeout_secs: 15,
        }
    }
}

impl Default for NotesConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("homedash");
        Self { data_dir }
    }
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
            request_timeout_secs: 30,
            pull_timeout_secs: 600,
        }
    }
}

impl WeatherConfig {
    pub fn location(&self) -> Location {
        Location {
            location_name: self.location_name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval)
    }
}

impl ContainersConfig {
    pub fn settings(&self) -> ContainerSettings {
        ContainerSettings {
            stop_grace_secs: self.stop_timeout_secs,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            pull_timeout: Duration::from_secs(self.pull_timeout_secs),
        }
    }
}

impl DashboardConfig {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("homedash").join("config.toml"))
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Write to `path`, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        Ok(())
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.server.api_key = Some(key.trim().to_string());
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Set the weather location and save
    pub fn set_weather_location(&mut self, location: &Location, path: &Path) -> Result<()> {
        self.weather.location_name = location.location_name.clone();
        self.weather.latitude = location.latitude;
        self.weather.longitude = location.longitude;
        self.save(path)
    }

    /// Check ranges; returns human-readable problems, empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }

        if let Some(key) = &self.server.api_key {
            if key.trim().is_empty() {
                errors.push("server.api_key is set but empty".to_string());
            }
        }

        if !(1..=60).contains(&self.metrics.collection_interval) {
            errors.push(format!(
                "metrics.collection_interval must be 1-60 seconds, got {}",
                self.metrics.collection_interval
            ));
        }

        if !(60..=3600).contains(&self.metrics.max_history_duration) {
            errors.push(format!(
                "metrics.max_history_duration must be 60-3600 seconds, got {}",
                self.metrics.max_history_duration
            ));
        }

        if !(1..=48).contains(&self.weather.forecast_hours) {
            errors.push(format!(
                "weather.forecast_hours must be 1-48, got {}",
                self.weather.forecast_hours
            ));
        }

        if self.weather.cache_ttl_minutes == 0 {
            errors.push("weather.cache_ttl_minutes must be at least 1".to_string());
        }

        if self.weather.request_timeout_secs == 0 {
            errors.push("weather.request_timeout_secs must be at least 1".to_string());
        }

        if !(-90.0..=90.0).contains(&self.weather.latitude) {
            errors.push(format!("weather.latitude out of range: {}", self.weather.latitude));
        }

        if !(-180.0..=180.0).contains(&self.weather.longitude) {
            errors.push(format!("weather.longitude out of range: {}", self.weather.longitude));
        }

        if self.containers.request_timeout_secs == 0 || self.containers.pull_timeout_secs == 0 {
            errors.push("containers timeouts must be at least 1 second".to_string());
        }

        errors
    }
}
