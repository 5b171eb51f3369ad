use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_machine::position::Position;
use thiserror::Error;
use tracing::{debug, info};

/// Everything the live bot must remember across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub position: Position,
    /// Auto-trading stopped after an unconfirmed order. Cleared only by an operator.
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            position: Position::flat(),
            halted: false,
            halt_reason: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid json: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("lock {path} is held by another instance (remove it if that process is gone)")]
    Locked { path: PathBuf },
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

pub trait StateStore: Send + Sync {
    /// `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<BotState>, StoreError>;

    fn save(&self, state: &BotState) -> Result<(), StoreError>;
}

impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        (**self).load()
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        (**self).save(state)
    }
}

/// Pretty JSON on disk, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file, starting flat");
                return Ok(None);
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let state = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(state))
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // write-then-rename so a crash never leaves half a file behind
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        f.write_all(json.as_bytes()).map_err(|e| self.io_err(e))?;
        f.sync_all().map_err(|e| self.io_err(e))?;
        drop(f);
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}

/// Process-local store, for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Option<BotState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BotState) -> Self {
        Self {
            inner: Mutex::new(Some(state)),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        *guard = Some(state.clone());
        Ok(())
    }
}
