//! Durable snapshot persistence for the runtime's system state.
//!
//! Snapshots are opaque JSON objects keyed by top-level state field. The store never
//! interprets the fields; the engine owns the schema and applies a shallow merge on load.

use crate::path_processing::{app_config_dir, expand_tilde};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable controlling the snapshot file location.
pub const STATE_PATH_ENV: &str = "READMES_STATE_PATH";

/// Default filename for the persisted snapshot.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors surfaced by snapshot store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// I/O failure while reading or writing the snapshot file.
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure while encoding the snapshot.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared trait implemented by snapshot persistence backends.
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot, or `None` when nothing usable has been saved.
    fn load_snapshot(&self) -> Result<Option<Map<String, Value>>, StateStoreError>;

    /// Replace the saved snapshot.
    fn save_snapshot(&self, snapshot: &Map<String, Value>) -> Result<(), StateStoreError>;
}

/// JSON-backed snapshot store persisted on disk.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Create a store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P) -> Self {
        let path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_state_path(),
        };
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonStateStore {
    fn load_snapshot(&self) -> Result<Option<Map<String, Value>>, StateStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved state found");
                return Ok(None);
            }
            Err(error) => return Err(self.io_error(error)),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(snapshot)) => Ok(Some(snapshot)),
            Ok(other) => {
                warn!(path = %self.path.display(), found = %json_kind(&other), "saved state is not an object; ignoring it");
                Ok(None)
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to parse saved state; ignoring it");
                Ok(None)
            }
        }
    }

    fn save_snapshot(&self, snapshot: &Map<String, Value>) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| self.io_error(error))?;
        }
        let content = serde_json::to_string_pretty(snapshot)?;

        // Stage beside the target, then rename over it.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content).map_err(|error| self.io_error(error))?;
        fs::rename(&staging, &self.path).map_err(|error| self.io_error(error))?;
        debug!(path = %self.path.display(), keys = snapshot.len(), "state saved");
        Ok(())
    }
}

/// In-memory snapshot store primarily used for unit testing.
#[derive(Default)]
pub struct InMemoryStateStore {
    snapshot: Mutex<Option<Map<String, Value>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn load_snapshot(&self) -> Result<Option<Map<String, Value>>, StateStoreError> {
        let snapshot = self.snapshot.lock().expect("state lock poisoned");
        Ok(snapshot.clone())
    }

    fn save_snapshot(&self, snapshot: &Map<String, Value>) -> Result<(), StateStoreError> {
        let mut stored = self.snapshot.lock().expect("state lock poisoned");
        *stored = Some(snapshot.clone());
        Ok(())
    }
}

/// Snapshot path from `READMES_STATE_PATH`, falling back to `<config_dir>/readmes/state.json`.
pub fn default_state_path() -> PathBuf {
    if let Ok(path) = env::var(STATE_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    app_config_dir().join(STATE_FILE_NAME)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_snapshot() -> Map<String, Value> {
        json!({"variables": {"text": "hi"}, "warmholes": {}}).as_object().cloned().unwrap()
    }

    #[test]
    fn json_store_round_trips_snapshot() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(Some(dir.path().join("nested").join("state.json")));
        store.save_snapshot(&sample_snapshot()).unwrap();

        let reloaded = JsonStateStore::new(Some(store.path().to_path_buf()));
        assert_eq!(reloaded.load_snapshot().unwrap(), Some(sample_snapshot()));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::new(Some(dir.path().join("absent.json")));
        assert_eq!(store.load_snapshot().unwrap(), None);
    }

    #[test]
    fn corrupt_or_non_object_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonStateStore::new(Some(path.clone()));

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(store.load_snapshot().unwrap(), None);

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(store.load_snapshot().unwrap(), None);
    }

    #[test]
    fn in_memory_store_keeps_last_snapshot() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.load_snapshot().unwrap(), None);
        store.save_snapshot(&sample_snapshot()).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), Some(sample_snapshot()));
    }

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(STATE_PATH_ENV, Some("~/custom/readmes/state.json"), || {
            assert_eq!(default_state_path(), expand_tilde("~/custom/readmes/state.json"));
        });
    }
}
