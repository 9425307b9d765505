//! Locally persisted client preferences

use crate::types::AuthSession;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Preferences I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preferences are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub nickname: Option<String>,
    pub last_room_code: Option<String>,
    /// Anonymous session to resume across launches
    pub session: Option<AuthSession>,
    pub background_animation: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            nickname: None,
            last_room_code: None,
            session: None,
            background_animation: true,
        }
    }
}

/// Preferences bound to a file. Without a path nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct PrefsStore {
    path: Option<PathBuf>,
    pub prefs: Preferences,
}

impl PrefsStore {
    /// Load from `path`; a missing or unreadable file yields defaults
    pub fn open(path: Option<PathBuf>) -> Self {
        let prefs = match path.as_deref().map(Self::read) {
            Some(Ok(prefs)) => prefs,
            Some(Err(PrefsError::Io(e))) if e.kind() == std::io::ErrorKind::NotFound => {
                Preferences::default()
            }
            Some(Err(e)) => {
                tracing::warn!("Discarding stored preferences: {}", e);
                Preferences::default()
            }
            None => Preferences::default(),
        };
        Self { path, prefs }
    }

    fn read(path: &Path) -> Result<Preferences, PrefsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self) -> Result<(), PrefsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.prefs)?)?;
        Ok(())
    }

    /// Apply `f` and persist, logging instead of failing
    pub fn update(&mut self, f: impl FnOnce(&mut Preferences)) {
        f(&mut self.prefs);
        if let Err(e) = self.save() {
            tracing::warn!("Failed to save preferences: {}", e);
        }
    }
}
