//! Persistent scene record.
//!
//! The record lives in a single JSON file that exists only while a scene is running.
//! Writes go to a sibling temp file which is then renamed over the target, so a crash
//! never leaves a half-written record behind.

use crate::error::PersistenceError;
use crate::model::PersistedSceneRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STATE_FILE_NAME: &str = "scene-state.json";

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/hue-scene-guard/scene-state.json`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .map(|d| d.join("hue-scene-guard"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STATE_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(STATE_FILE_NAME);
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    pub fn save(&self, record: &PersistedSceneRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let temp_path = self.temp_path();
        std::fs::write(&temp_path, &json).map_err(|e| PersistenceError::io(&temp_path, e))?;
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(PersistenceError::io(&self.path, e));
        }
        debug!(path = %self.path.display(), pid = record.pid, "scene record saved");
        Ok(())
    }

    /// Delete the record. A missing file is not an error.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "scene record removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }

    /// Delete the record only while it still names `pid`.
    ///
    /// Several processes may share one state file; a record another instance wrote
    /// for its own worker is left alone. Returns true if a file was removed.
    pub fn release(&self, pid: u32) -> Result<bool, PersistenceError> {
        match self.load()? {
            Some(record) if record.pid == pid => {
                self.clear()?;
                Ok(true)
            }
            Some(record) => {
                debug!(
                    path = %self.path.display(),
                    pid,
                    owner = record.pid,
                    "scene record belongs to another worker, keeping it"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Read the record. Malformed content is deleted and reported as "no record".
    pub fn load(&self) -> Result<Option<PersistedSceneRecord>, PersistenceError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!(path = %self.path.display(), "scene record is not UTF-8, discarding");
                self.clear()?;
                return Ok(None);
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        match serde_json::from_str::<PersistedSceneRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt scene record, discarding");
                self.clear()?;
                Ok(None)
            }
        }
    }
}
