//! Server registry.
//!
//! The registry is the single record of which named servers are known, where
//! they listen, and whether this orchestrator owns their lifecycle. It is the
//! exclusive owner of every `ServerRecord`; the process supervisor reaches
//! the `process` field only through the registry's own methods.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Child;

use crate::state::PersistedServer;
use crate::TokioMutex;

/// Registry handle shared between the orchestrator and the exit monitor.
///
/// Mutation happens only under the lock, so every mutation point is a
/// suspension point and no record is touched by two operations at once.
pub type SharedRegistry = Arc<TokioMutex<ServerRegistry>>;

/// How long the kill sweep waits for each terminated process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// A known tool server.
pub struct ServerRecord {
    /// Opaque UUID-format token, stable across persistence round-trips.
    pub id: String,
    pub name: String,
    /// HTTP base url of the server's control channel.
    pub url: String,
    /// Present only when this orchestrator launched the process. Recovered
    /// servers are reachable but not owned.
    process: Option<Child>,
    pub registered_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Whether this orchestrator manages the server's lifecycle.
    pub fn is_owned(&self) -> bool {
        self.process.is_some()
    }
}

/// In-memory record of known servers, keyed by unique name.
#[derive(Default)]
pub struct ServerRegistry {
    records: HashMap<String, ServerRecord>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server this orchestrator just launched.
    ///
    /// A record under the same name is replaced; the supervisor has already
    /// ensured the old process is gone before relaunching.
    pub fn register_owned(&mut self, name: &str, url: &str, process: Child) {
        let record = ServerRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            process: Some(process),
            registered_at: Utc::now(),
        };
        tracing::info!(server = name, url, "registered owned server");
        self.records.insert(name.to_string(), record);
    }

    /// Register a server recovered from persisted state or otherwise not
    /// launched by this instance. Existing records win: recovery never
    /// displaces a live launch.
    pub fn register_discovered(&mut self, name: &str, id: &str, url: &str) {
        if self.records.contains_key(name) {
            tracing::debug!(server = name, "already registered, skipping discovered entry");
            return;
        }
        let record = ServerRecord {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            process: None,
            registered_at: Utc::now(),
        };
        tracing::info!(server = name, url, "registered discovered server");
        self.records.insert(name.to_string(), record);
    }

    pub fn lookup(&self, name: &str) -> Option<&ServerRecord> {
        self.records.get(name)
    }

    /// Endpoint of a server, cloned out so callers can drop the lock before
    /// going to the network.
    pub fn url_for(&self, name: &str) -> Option<String> {
        self.records.get(name).map(|r| r.url.clone())
    }

    pub fn all(&self) -> impl Iterator<Item = &ServerRecord> {
        self.records.values()
    }

    /// `(name, url)` pairs for catalog polling.
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.records
            .values()
            .map(|r| (r.name.clone(), r.url.clone()))
            .collect()
    }

    /// Sorted server names.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove(&mut self, name: &str) -> Option<ServerRecord> {
        self.records.remove(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn owned_count(&self) -> usize {
        self.records.values().filter(|r| r.is_owned()).count()
    }

    /// The persistable view: `(name, id, url)` only. Process handles never
    /// survive a restart.
    pub fn persistable(&self) -> HashMap<String, PersistedServer> {
        self.records
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    PersistedServer {
                        id: record.id.clone(),
                        url: record.url.clone(),
                    },
                )
            })
            .collect()
    }

    /// Prune owned servers whose process has exited.
    ///
    /// Returns the names removed so the caller can log them. Lookup for a
    /// pruned name returns absent until a new launch; other servers are
    /// untouched.
    pub fn reap_exited(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        for (name, record) in self.records.iter_mut() {
            if let Some(process) = record.process.as_mut() {
                match process.try_wait() {
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        tracing::warn!(server = %name, %status, "server process exited");
                        exited.push(name.clone());
                    }
                    Err(e) => {
                        // Cannot observe the process anymore; assume dead.
                        tracing::warn!(server = %name, error = %e, "server process unobservable");
                        exited.push(name.clone());
                    }
                }
            }
        }
        for name in &exited {
            self.records.remove(name);
        }
        exited
    }

    /// Remove one server, killing its process when owned.
    ///
    /// Returns whether a record existed under that name.
    pub async fn stop_server(&mut self, name: &str) -> bool {
        let Some(mut record) = self.records.remove(name) else {
            return false;
        };
        if let Some(process) = record.process.as_mut() {
            if let Err(e) = process.start_kill() {
                tracing::warn!(server = name, error = %e, "failed to signal server");
            } else if tokio::time::timeout(REAP_TIMEOUT, process.wait())
                .await
                .is_err()
            {
                tracing::warn!(server = name, "server did not exit after kill signal");
            }
        }
        tracing::info!(server = name, "stopped server");
        true
    }

    /// Best-effort kill sweep over every owned process, then drop all
    /// records. A process that refuses to die is logged and does not block
    /// termination of the others.
    pub async fn terminate_owned(&mut self) -> usize {
        let mut killed = 0;
        for (name, record) in self.records.iter_mut() {
            if let Some(process) = record.process.as_mut() {
                if let Err(e) = process.start_kill() {
                    tracing::warn!(server = %name, error = %e, "failed to signal server");
                    continue;
                }
                match tokio::time::timeout(REAP_TIMEOUT, process.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::info!(server = %name, %status, "terminated server");
                        killed += 1;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(server = %name, error = %e, "failed to reap server");
                    }
                    Err(_) => {
                        tracing::warn!(server = %name, "server did not exit after kill signal");
                    }
                }
            }
        }
        self.records.clear();
        killed
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
