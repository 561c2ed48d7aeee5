//! Daemon configuration: a JSON file with per-section defaults, plus CLI/env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sp_core::error::AppError;
use sp_core::overview::OverviewSettings;
use sp_sync::provider::Connector;
use sp_sync::scheduler::SchedulerConfig;
use sp_sync::SyncSettings;

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "statusd.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub overview: OverviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("statuspage.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-request provider timeout; kept under ten seconds.
    pub provider_timeout_secs: u64,
    pub open_page_limit: usize,
    pub resolved_lookback_limit: usize,
    /// How often the scheduler re-reads the datasource table.
    pub refresh_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let settings = SyncSettings::default();
        Self {
            provider_timeout_secs: 8,
            open_page_limit: settings.open_page_limit,
            resolved_lookback_limit: settings.resolved_lookback_limit,
            refresh_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverviewConfig {
    pub cache_ttl_secs: u64,
    pub upcoming_maintenance_days: i64,
    pub upcoming_maintenance_limit: usize,
}

impl Default for OverviewConfig {
    fn default() -> Self {
        let settings = OverviewSettings::default();
        Self {
            cache_ttl_secs: 30,
            upcoming_maintenance_days: settings.upcoming_maintenance_days,
            upcoming_maintenance_limit: settings.upcoming_maintenance_limit,
        }
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new("CONFIG_INVALID", message)
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<(), AppError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(invalid(format!("{field} must be between {min} and {max}"))
            .with_details(format!("{field}={value}")));
    }
    Ok(())
}

impl Config {
    /// Load from `path`, or from `statusd.json` in the working directory when present.
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::new("CONFIG_READ_FAILED", "Failed to read config file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text)
            .map_err(|e| invalid("Failed to parse config").with_details(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        check_range("sync.provider_timeout_secs", self.sync.provider_timeout_secs, 1, 9)?;
        check_range("sync.open_page_limit", self.sync.open_page_limit, 1, 100)?;
        check_range(
            "sync.resolved_lookback_limit",
            self.sync.resolved_lookback_limit,
            1,
            100,
        )?;
        check_range("sync.refresh_interval_secs", self.sync.refresh_interval_secs, 1, 3600)?;
        check_range("overview.cache_ttl_secs", self.overview.cache_ttl_secs, 1, 3600)?;
        check_range(
            "overview.upcoming_maintenance_days",
            self.overview.upcoming_maintenance_days,
            1,
            90,
        )?;
        check_range(
            "overview.upcoming_maintenance_limit",
            self.overview.upcoming_maintenance_limit,
            1,
            50,
        )?;
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path must not be empty"));
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            open_page_limit: self.sync.open_page_limit,
            resolved_lookback_limit: self.sync.resolved_lookback_limit,
        }
    }

    pub fn overview_settings(&self) -> OverviewSettings {
        OverviewSettings {
            upcoming_maintenance_days: self.overview.upcoming_maintenance_days,
            upcoming_maintenance_limit: self.overview.upcoming_maintenance_limit,
        }
    }

    pub fn connector(&self) -> Connector {
        Connector::new(Duration::from_secs(self.sync.provider_timeout_secs))
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            db_path: self.database.path.clone(),
            settings: self.sync_settings(),
            refresh_interval: Duration::from_secs(self.sync.refresh_interval_secs),
        }
    }
}
