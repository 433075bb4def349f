//! Persisted profiler settings.
//!
//! Read once when the profiler is built and written back at shutdown. A
//! missing or unreadable file is not an error: defaults are used instead.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::sampler::{clamp_interval, DEFAULT_INTERVAL_MS};
use crate::entities::{ColumnId, ColumnRegistry, ViewMode};

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "profview.json";

/// Log file name inside the data directory
pub const LOG_FILE: &str = "profview.log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerSettings {
    pub view_mode: ViewMode,
    pub active_only: bool,
    pub hidden_columns: Vec<ColumnId>,
    pub refresh_interval_ms: u64,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::default(),
            active_only: false,
            hidden_columns: ColumnRegistry::standard().default_hidden(),
            refresh_interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl ProfilerSettings {
    /// Clamp the interval and drop duplicate column entries
    pub fn sanitize(mut self) -> Self {
        self.refresh_interval_ms = clamp_interval(self.refresh_interval_ms);
        self.hidden_columns.sort();
        self.hidden_columns.dedup();
        // Name is the tree column and can never be hidden
        self.hidden_columns.retain(|c| *c != ColumnId::Name);
        self
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
        fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json =
            fs::read_to_string(path).with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: ProfilerSettings =
            serde_json::from_str(&json).with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        Ok(settings.sanitize())
    }
}

/// Load settings, falling back to defaults on any problem
pub fn load(path: &Path) -> ProfilerSettings {
    if !path.exists() {
        info!("No settings at {}, using defaults", path.display());
        return ProfilerSettings::default();
    }
    match ProfilerSettings::from_json(path) {
        Ok(settings) => {
            info!("Loaded settings from {}", path.display());
            settings
        }
        Err(e) => {
            warn!("{:#}; using defaults", e);
            ProfilerSettings::default()
        }
    }
}

pub fn save(path: &Path, settings: &ProfilerSettings) -> Result<()> {
    settings.to_json(path)?;
    info!("Saved settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("profview_config_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.join(SETTINGS_FILE)
    }

    #[test]
    fn test_defaults() {
        let settings = ProfilerSettings::default();
        assert_eq!(settings.view_mode, ViewMode::Scene);
        assert_eq!(settings.refresh_interval_ms, 1000);
        assert!(settings.hidden_columns.contains(&ColumnId::Descendants));
        assert!(!settings.hidden_columns.contains(&ColumnId::Name));
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_file("roundtrip");
        let settings = ProfilerSettings {
            view_mode: ViewMode::SceneNested,
            active_only: true,
            hidden_columns: vec![ColumnId::Type, ColumnId::Tick],
            refresh_interval_ms: 2500,
        };
        save(&path, &settings).unwrap();
        assert_eq!(load(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_and_out_of_range() {
        let path = temp_file("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"view_mode":"filter","refresh_interval_ms":5}"#).unwrap();

        let settings = load(&path);
        assert_eq!(settings.view_mode, ViewMode::Filter);
        assert_eq!(settings.refresh_interval_ms, 500);
        assert!(!settings.active_only);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_or_missing_falls_back() {
        let path = temp_file("corrupt");
        assert_eq!(load(&path), ProfilerSettings::default());

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load(&path), ProfilerSettings::default());
        assert!(ProfilerSettings::from_json(&path).is_err());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_sanitize() {
        let settings = ProfilerSettings {
            hidden_columns: vec![ColumnId::Tick, ColumnId::Name, ColumnId::Tick],
            refresh_interval_ms: 99_000,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(settings.hidden_columns, vec![ColumnId::Tick]);
        assert_eq!(settings.refresh_interval_ms, 10_000);
    }
}
