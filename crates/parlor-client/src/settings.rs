//! The one piece of persisted local state: the display theme.
//!
//! Stored as a single-key JSON file in the platform data directory:
//! - Linux:   `~/.local/share/parlor/settings.json`
//! - macOS:   `~/Library/Application Support/com.parlor.parlor/settings.json`
//! - Windows: `{FOLDERID_RoamingAppData}\parlor\parlor\data\settings.json`
//!
//! The `*_from` / `*_to` variants take an explicit path, for tests and
//! custom layouts.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ClientError, Result};

/// Display theme preference.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    theme: Theme,
}

/// Default location of the settings file.
pub fn settings_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "parlor", "parlor").ok_or(ClientError::NoDataDir)?;
    Ok(dirs.data_dir().join("settings.json"))
}

/// Load the saved theme; a missing or unreadable file falls back to the
/// default.
pub fn load_theme() -> Theme {
    match settings_path() {
        Ok(path) => load_theme_from(&path),
        Err(_) => Theme::default(),
    }
}

pub fn load_theme_from(path: &Path) -> Theme {
    match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str::<SettingsFile>(&json) {
            Ok(settings) => settings.theme,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt settings file, using default theme");
                Theme::default()
            }
        },
        Err(_) => Theme::default(),
    }
}

pub fn save_theme(theme: Theme) -> Result<()> {
    save_theme_to(&settings_path()?, theme)
}

pub fn save_theme_to(path: &Path, theme: Theme) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&SettingsFile { theme })?;
    std::fs::write(path, json)?;
    Ok(())
}
