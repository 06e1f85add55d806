//! Server launch configuration.
//!
//! Tool servers are declared in a JSON file (`tool_servers.json`) mapping a
//! server name to the command that starts it. The orchestrator appends the
//! allocated endpoint to `args` at launch time, so configs never hard-code
//! ports unless they pin one via `endpoint`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::OrchestratorError;

/// Launch configuration for a single tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Pinned endpoint, e.g. `http://127.0.0.1:7801`. When absent, a free
    /// port is allocated at launch.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Top-level servers configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

impl ServersConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let raw = std::fs::read_to_string(path).map_err(|e| OrchestratorError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| OrchestratorError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })
    }

    /// Load the configuration, treating a missing file as an empty config.
    ///
    /// Parse errors are still surfaced; a present-but-broken file should not
    /// silently strip every server.
    pub fn load_or_default(path: &Path) -> Result<Self, OrchestratorError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no server config file, starting empty");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tool_servers.json");
        std::fs::write(
            &path,
            r#"{
                "servers": {
                    "files": {
                        "command": "file-server",
                        "args": ["--root", "/srv"],
                        "env": {"RUST_LOG": "info"}
                    },
                    "search": {"command": "search-server", "endpoint": "http://127.0.0.1:7801"}
                }
            }"#,
        )
        .unwrap();

        let config = ServersConfig::load(&path).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers["files"].args, vec!["--root", "/srv"]);
        assert_eq!(
            config.servers["search"].endpoint.as_deref(),
            Some("http://127.0.0.1:7801")
        );
        assert!(config.servers["search"].cwd.is_none());
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let config =
            ServersConfig::load_or_default(Path::new("/nonexistent/tool_servers.json")).unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tool_servers.json");
        std::fs::write(&path, "not json").unwrap();

        let err = ServersConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError { .. }));
    }
}
