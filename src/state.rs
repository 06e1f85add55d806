//! Durable registry state.
//!
//! A restarted orchestrator should rejoin tool servers a previous instance
//! left running instead of launching duplicates. The registry's `(name, url)`
//! pairs are persisted through a `StateStore`; the store is injected so tests
//! can substitute an in-memory implementation and never touch the real
//! filesystem. Stale entries cost nothing until call time, where they surface
//! as transport errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// A persisted server entry: an opaque UUID-format token plus the endpoint.
///
/// Process handles are deliberately not persistable; recovered servers are
/// always re-registered as discovered, never owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedServer {
    pub id: String,
    pub url: String,
}

/// Durable store for registry state.
///
/// `load` never fails: an absent, malformed, or unreadable store is reported
/// through logging and treated as "no prior state", so orchestrator
/// construction cannot be blocked by persistence problems.
pub trait StateStore: Send + Sync {
    fn load(&self) -> HashMap<String, PersistedServer>;
    fn save(&self, servers: &HashMap<String, PersistedServer>) -> Result<(), OrchestratorError>;
    /// Reset to an empty record set.
    fn clear(&self) -> Result<(), OrchestratorError>;
}

// ─── File-backed Store ───────────────────────────────────────────────────────

/// JSON file store: an object mapping server name to `{ id, url }`,
/// overwritten wholesale on every save.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The platform-standard location, `<data dir>/servers.json`.
    pub fn default_path() -> PathBuf {
        crate::data_dir().join("servers.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, contents: &str) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OrchestratorError::PersistenceFailure {
                reason: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
        std::fs::write(&self.path, contents).map_err(|e| OrchestratorError::PersistenceFailure {
            reason: format!("failed to write {}: {e}", self.path.display()),
        })
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> HashMap<String, PersistedServer> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no state file, starting empty");
                return HashMap::new();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state file unreadable, treating as empty"
                );
                return HashMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(servers) => servers,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state file malformed, treating as empty"
                );
                HashMap::new()
            }
        }
    }

    fn save(&self, servers: &HashMap<String, PersistedServer>) -> Result<(), OrchestratorError> {
        let json = serde_json::to_string_pretty(servers).map_err(|e| {
            OrchestratorError::PersistenceFailure {
                reason: format!("failed to serialize state: {e}"),
            }
        })?;
        self.write(&json)
    }

    fn clear(&self) -> Result<(), OrchestratorError> {
        self.write("{}")
    }
}

// ─── In-memory Store ─────────────────────────────────────────────────────────

/// In-memory store for tests and embedders that opt out of durability.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, PersistedServer>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, as if a prior instance had saved.
    pub fn with_entries(entries: HashMap<String, PersistedServer>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> HashMap<String, PersistedServer> {
        self.entries.lock().expect("state store lock").clone()
    }

    fn save(&self, servers: &HashMap<String, PersistedServer>) -> Result<(), OrchestratorError> {
        *self.entries.lock().expect("state store lock") = servers.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), OrchestratorError> {
        self.entries.lock().expect("state store lock").clear();
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> HashMap<String, PersistedServer> {
        let mut servers = HashMap::new();
        servers.insert(
            "files".to_string(),
            PersistedServer {
                id: uuid::Uuid::new_v4().to_string(),
                url: "http://127.0.0.1:7801".to_string(),
            },
        );
        servers.insert(
            "search".to_string(),
            PersistedServer {
                id: uuid::Uuid::new_v4().to_string(),
                url: "http://127.0.0.1:7802".to_string(),
            },
        );
        servers
    }

    #[test]
    fn test_file_store_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path().join("servers.json"));

        let saved = sample_state();
        store.save(&saved).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_file_store_save_overwrites_wholesale() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path().join("servers.json"));

        store.save(&sample_state()).unwrap();

        let mut second = HashMap::new();
        second.insert(
            "only".to_string(),
            PersistedServer {
                id: uuid::Uuid::new_v4().to_string(),
                url: "http://127.0.0.1:7803".to_string(),
            },
        );
        store.save(&second).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("only"));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = FileStateStore::new("/nonexistent/dir/servers.json");
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("servers.json");
        std::fs::write(&path, "{{{ definitely not json").unwrap();

        let store = FileStateStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_clear_resets_to_empty_object() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("servers.json");
        let store = FileStateStore::new(&path);

        store.save(&sample_state()).unwrap();
        store.clear().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_clear_creates_parent_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path().join("nested").join("servers.json"));
        store.clear().unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let saved = sample_state();
        store.save(&saved).unwrap();
        assert_eq!(store.load(), saved);

        store.clear().unwrap();
        assert!(store.load().is_empty());
    }
}
