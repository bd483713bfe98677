//! Configuration resolution for RideSync.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/ridesync/settings.json)
//! 3. Project config (.ridesync/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::PoolOptions;
use crate::error::{Error, Result};

/// Complete RideSync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            activity: ActivityConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    /// Events buffered per table before slow subscribers start missing them.
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
            busy_timeout_secs: 5,
            feed_capacity: 256,
        }
    }
}

impl StoreConfig {
    pub const fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
        }
    }

    /// Configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(database_path)
    }
}

/// Synchronization engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Client-side timeout for every store call.
    pub operation_timeout_ms: u64,
    /// Periodic reconciling re-fetch. Zero disables it.
    pub resync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 10_000,
            resync_interval_secs: 60,
        }
    }
}

impl SyncConfig {
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub const fn resync_interval(&self) -> Option<Duration> {
        if self.resync_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.resync_interval_secs))
        }
    }
}

/// Activity feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Entries kept in the client-side sliding window.
    pub window: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { window: 50 }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".ridesync").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config)?;
    validate(&config)?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ridesync").join("settings.json"))
}

/// Default location of the ride database.
pub fn database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ridesync").join("rides.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.store.database_path.is_some() {
        base.store.database_path = overlay.store.database_path;
    }
    base.store.max_connections = overlay.store.max_connections;
    base.store.busy_timeout_secs = overlay.store.busy_timeout_secs;
    base.store.feed_capacity = overlay.store.feed_capacity;

    base.sync = overlay.sync;
    base.activity = overlay.activity;
    base.log_level = overlay.log_level;
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {val:?}"))),
        Err(_) => Ok(None),
    }
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(val) = std::env::var("RIDESYNC_DB_PATH") {
        config.store.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("RIDESYNC_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(ms) = parse_env("RIDESYNC_OPERATION_TIMEOUT_MS")? {
        config.sync.operation_timeout_ms = ms;
    }
    if let Some(secs) = parse_env("RIDESYNC_RESYNC_INTERVAL_SECS")? {
        config.sync.resync_interval_secs = secs;
    }
    if let Some(window) = parse_env("RIDESYNC_ACTIVITY_WINDOW")? {
        config.activity.window = window;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.activity.window == 0 {
        return Err(Error::Config("activity.window must be at least 1".into()));
    }
    if config.sync.operation_timeout_ms == 0 {
        return Err(Error::Config(
            "sync.operation_timeout_ms must be at least 1".into(),
        ));
    }
    if config.store.feed_capacity == 0 {
        return Err(Error::Config("store.feed_capacity must be at least 1".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_activity_window_is_50() {
        assert_eq!(Config::default().activity.window, 50);
    }

    #[test]
    fn default_timeouts() {
        let config = Config::default();
        assert_eq!(config.sync.operation_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.resync_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_resync_interval_disables_refetch() {
        let sync = SyncConfig {
            resync_interval_secs: 0,
            ..SyncConfig::default()
        };
        assert_eq!(sync.resync_interval(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"activity": {"window": 10}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.activity.window, 10);
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn project_overlay_keeps_base_database_path() {
        let mut base = Config::default();
        base.store.database_path = Some(PathBuf::from("/tmp/base.db"));
        let mut overlay = Config::default();
        overlay.sync.resync_interval_secs = 5;

        merge_config(&mut base, overlay);
        assert_eq!(base.store.database_path, Some(PathBuf::from("/tmp/base.db")));
        assert_eq!(base.sync.resync_interval_secs, 5);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut config = Config::default();
        config.activity.window = 0;
        assert!(validate(&config).is_err());
    }
}
