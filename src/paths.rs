//! Config and data file locations.
//!
//! Lookup order for both directories:
//! 1. `--config-dir` on the command line
//! 2. `PROFVIEW_CONFIG_DIR` environment variable
//! 3. the current directory, if it already holds profview files
//! 4. the platform directory from `dirs-next` (`~/.config/profview`,
//!    `~/.local/share/profview`, `%APPDATA%\profview`, ...)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{LOG_FILE, SETTINGS_FILE};

/// Environment override for both directories
pub const CONFIG_DIR_ENV: &str = "PROFVIEW_CONFIG_DIR";

const APP_DIR: &str = "profview";

#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Explicit directory (CLI or env); wins over everything else
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// CLI argument first, then the environment
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from));
        Self { config_dir }
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_file(SETTINGS_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_file(LOG_FILE)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir())
    }

    fn resolve(&self, platform: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(cwd) = std::env::current_dir() {
            if has_local_files(&cwd) {
                return cwd;
            }
        }
        platform
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create both directories if missing
    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();
        for dir in [&config_dir, &data_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/custom")));
        assert_eq!(config.settings_file(), PathBuf::from("/custom/profview.json"));
        assert_eq!(config.log_file(), PathBuf::from("/custom/profview.log"));
    }

    #[test]
    fn test_platform_default_mentions_app() {
        let config = PathConfig { config_dir: None };
        let path = config.config_file("x.json");
        assert!(path.ends_with("x.json"));
        // Either cwd with local files, the platform dir, or "."
        let cwd = std::env::current_dir().unwrap();
        assert!(path.to_string_lossy().contains(APP_DIR) || path.starts_with(&cwd) || path.starts_with("."));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = std::env::temp_dir().join(format!("profview_paths_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let config = PathConfig {
            config_dir: Some(dir.join("nested")),
        };
        config.ensure_dirs().unwrap();
        assert!(dir.join("nested").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
