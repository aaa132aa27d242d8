use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

pub const DEFAULT_WIDTH: u32 = 420;
pub const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Default for Position {
    /// Negative coordinates mean "never placed"; the surface falls back to
    /// the default top-right slot.
    fn default() -> Self {
        Self { x: -1, y: -1 }
    }
}

impl Position {
    pub fn is_placed(&self) -> bool {
        self.x >= 0 && self.y >= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    credential: String,
    position: Position,
    size: Size,
}

/// JSON-backed key/value store for the handful of values that survive a
/// restart. Every setter writes through to disk before returning.
pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(UserSettings::default()),
        }
    }

    pub fn credential(&self) -> String {
        self.read().credential.clone()
    }

    pub fn position(&self) -> Position {
        self.read().position
    }

    pub fn size(&self) -> Size {
        self.read().size
    }

    pub fn set_credential(&self, credential: String) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.credential = credential;
        self.persist(&guard)
    }

    pub fn set_position(&self, position: Position) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.position = position;
        self.persist(&guard)
    }

    pub fn set_size(&self, size: Size) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.size = size;
        self.persist(&guard)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
