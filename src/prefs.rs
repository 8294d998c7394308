//! Persisted user preferences.
//!
//! Currently just the playback mute flag, which survives across sessions
//! so a muted journey stays muted on return.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Playback is muted.
    #[serde(default)]
    pub muted: bool,
}

impl Preferences {
    /// Load preferences from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("invalid preferences file: {e}")))
    }

    /// Write preferences to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("cannot serialize preferences: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location: `~/.config/wayfarer/prefs.toml` (platform
    /// equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wayfarer").join("prefs.toml"))
    }
}
