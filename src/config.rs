//! Editor settings persisted as TOML.
//!
//! Location:
//!   Linux:    `~/.config/staxie/settings.toml` (XDG_CONFIG_HOME respected)
//!   Windows:  `%APPDATA%\Staxie\settings.toml`
//!   macOS:    `~/Library/Application Support/Staxie/settings.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::stax::DEFAULT_FRAME_TIME;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub default_frame_width: u32,
    pub default_frame_height: u32,
    /// Milliseconds.
    pub default_frame_time: u32,
    /// 0 keeps every step.
    pub max_undo_steps: usize,
    /// zlib level, 0-9.
    pub compression_level: u32,
    /// Maximum payload of one IDAT chunk.
    pub idat_chunk_size: usize,
    pub verify_crc: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_frame_width: 16,
            default_frame_height: 16,
            default_frame_time: DEFAULT_FRAME_TIME,
            max_undo_steps: 0,
            compression_level: 6,
            idat_chunk_size: 1 << 16,
            verify_crc: true,
        }
    }
}

impl EditorSettings {
    /// Platform settings path. Creates the parent directory.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        let dir = std::env::var("APPDATA")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("Staxie"));
        #[cfg(target_os = "macos")]
        let dir = std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Staxie")
        });
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
            .ok()
            .map(|base| base.join("staxie"));

        let dir = dir?;
        let _ = std::fs::create_dir_all(&dir);
        Some(dir.join("settings.toml"))
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings.sanitized())
    }

    /// Save settings to the platform path.
    pub fn save(&self) -> Result<(), ConfigError> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Clamp values that would make the codec misbehave.
    fn sanitized(mut self) -> Self {
        self.compression_level = self.compression_level.min(9);
        self.idat_chunk_size = self.idat_chunk_size.max(1);
        self.default_frame_width = self.default_frame_width.clamp(1, u16::MAX as u32);
        self.default_frame_height = self.default_frame_height.clamp(1, u16::MAX as u32);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max_undo_steps = 50\ncompression_level = 12\n").unwrap();
        let settings = EditorSettings::load_from(&path).unwrap();
        assert_eq!(settings.max_undo_steps, 50);
        assert_eq!(settings.compression_level, 9);
        assert_eq!(settings.default_frame_width, 16);
        assert!(settings.verify_crc);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let settings = EditorSettings {
            default_frame_time: 250,
            verify_crc: false,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max_undo_steps = \"lots\"").unwrap();
        assert!(matches!(EditorSettings::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
