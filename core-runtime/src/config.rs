//! # Engine Configuration
//!
//! Settings for the collection engine: the database location, the watched
//! folder set, scan behavior, and per-collection status overrides. The
//! configuration is read from the application settings store at startup and
//! written back at shutdown.
//!
//! ## Overview
//!
//! [`EngineConfig`] is constructed through a fail-fast builder so a missing
//! database path is caught at composition time rather than on first query.
//! The on-disk representation is a single JSON object of keyed
//! string/bool/list values.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::config::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .database_path("/home/user/.local/share/collection/collection.db")
//!     .add_folder("/home/user/Music")
//!     .scan_recursively(true)
//!     .build()?;
//!
//! config.save(&settings_path)?;
//! let restored = EngineConfig::load(&settings_path)?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persisted engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the local collection database file.
    pub database_path: PathBuf,

    /// Folders indexed by the scan pipeline.
    pub collection_folders: Vec<PathBuf>,

    /// Whether scans descend into subdirectories.
    pub scan_recursively: bool,

    /// Whether directory-change monitoring is enabled.
    pub monitor_changes: bool,

    /// Companion directory for the cover-art image cache.
    pub cover_cache_dir: Option<PathBuf>,

    /// Status bit overrides keyed by collection id, as saved by the
    /// collection manager. The raw bits are interpreted by `core-collection`.
    #[serde(default)]
    pub collection_status: HashMap<String, u32>,
}

impl EngineConfig {
    /// Start building a configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Read the configuration from the settings file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading engine settings");
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Write the configuration to the settings file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!(path = %path.display(), "Engine settings saved");
        Ok(())
    }

    /// True when `other` watches a different folder set or scan depth,
    /// which invalidates the watch state and forces a full rescan.
    pub fn folders_changed(&self, other: &EngineConfig) -> bool {
        self.collection_folders != other.collection_folders
            || self.scan_recursively != other.scan_recursively
    }
}

/// Builder for [`EngineConfig`] with fail-fast validation.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    database_path: Option<PathBuf>,
    collection_folders: Vec<PathBuf>,
    scan_recursively: bool,
    monitor_changes: bool,
    cover_cache_dir: Option<PathBuf>,
    collection_status: HashMap<String, u32>,
}

impl EngineConfigBuilder {
    /// Set the collection database path. Required.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Add a folder to the watched set.
    pub fn add_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.collection_folders.push(folder.into());
        self
    }

    /// Replace the watched folder set.
    pub fn folders(mut self, folders: Vec<PathBuf>) -> Self {
        self.collection_folders = folders;
        self
    }

    /// Enable or disable recursive scanning.
    pub fn scan_recursively(mut self, recursive: bool) -> Self {
        self.scan_recursively = recursive;
        self
    }

    /// Enable or disable directory-change monitoring.
    pub fn monitor_changes(mut self, monitor: bool) -> Self {
        self.monitor_changes = monitor;
        self
    }

    /// Set the cover-art cache directory.
    pub fn cover_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cover_cache_dir = Some(dir.into());
        self
    }

    /// Seed a collection status override.
    pub fn collection_status(mut self, collection_id: impl Into<String>, bits: u32) -> Self {
        self.collection_status.insert(collection_id.into(), bits);
        self
    }

    /// Validate and build the configuration.
    ///
    /// Fails when no database path was provided.
    pub fn build(self) -> Result<EngineConfig> {
        let database_path = self
            .database_path
            .ok_or_else(|| Error::Config("database_path is required".to_string()))?;

        Ok(EngineConfig {
            database_path,
            collection_folders: self.collection_folders,
            scan_recursively: self.scan_recursively,
            monitor_changes: self.monitor_changes,
            cover_cache_dir: self.cover_cache_dir,
            collection_status: self.collection_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> EngineConfig {
        EngineConfig::builder()
            .database_path("/tmp/collection.db")
            .add_folder("/music/library")
            .add_folder("/music/incoming")
            .scan_recursively(true)
            .monitor_changes(true)
            .collection_status("local-collection", 0b101)
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_database_path() {
        let result = EngineConfig::builder().add_folder("/music").build();
        assert!(result.is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let config = sample_config();
        config.save(&path).unwrap();

        let restored = EngineConfig::load(&path).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn folders_changed_detects_watch_set_updates() {
        let config = sample_config();

        let mut same = config.clone();
        assert!(!config.folders_changed(&same));

        same.collection_folders.pop();
        assert!(config.folders_changed(&same));

        let mut depth_changed = config.clone();
        depth_changed.scan_recursively = false;
        assert!(config.folders_changed(&depth_changed));
    }
}
