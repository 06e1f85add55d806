//! Process supervision.
//!
//! Launching a tool server means: allocate a free endpoint, spawn the
//! configured command with that endpoint appended to its argument vector,
//! capture its output streams, probe the control channel until the server
//! answers, and register the record as owned. A monitor task prunes owned
//! servers from the registry as their processes exit.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::ServerConfig;
use crate::errors::OrchestratorError;
use crate::registry::SharedRegistry;
use crate::state::StateStore;
use crate::transport::Transport;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How often the exit monitor sweeps the registry for dead processes.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Readiness probing: bounded retries with doubling backoff instead of a
/// blind post-spawn sleep. Defaults cover roughly 12 seconds of startup,
/// enough for interpreter-based servers that import heavy dependencies.
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            attempts: 8,
            base_delay: Duration::from_millis(50),
        }
    }
}

// ─── Endpoint Allocation ─────────────────────────────────────────────────────

/// Reserve a free listening address for a child to bind.
///
/// Binding `127.0.0.1:0` makes the OS hand out a currently-unused port, so
/// concurrent launches within one orchestrator get distinct endpoints. The
/// listener is dropped before the child starts; the brief window in which
/// another process could grab the port is handled by the readiness probe
/// failing and the launch reporting an error.
pub async fn allocate_endpoint() -> std::io::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok(format!("http://127.0.0.1:{}", addr.port()))
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn the server process with the endpoint appended to its argv.
///
/// The child is detached from the orchestrator's controlling terminal (so it
/// can outlive this process and be rediscovered after a restart) with both
/// output streams captured and forwarded to the log.
fn spawn_server(
    name: &str,
    config: &ServerConfig,
    endpoint: &str,
) -> Result<Child, OrchestratorError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.arg(endpoint);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &config.cwd {
        cmd.current_dir(dir);
    }

    // New process group: the server must survive the orchestrator's exit so
    // a later instance can rejoin it from persisted state.
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| OrchestratorError::LaunchFailure {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(name, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(name, "stderr", stderr);
    }

    Ok(child)
}

/// Forward one captured output stream to the log, line by line.
fn forward_output(
    name: &str,
    stream: &'static str,
    source: impl tokio::io::AsyncRead + Unpin + Send + 'static,
) {
    let server = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, stream, "{line}");
        }
    });
}

// ─── Readiness ───────────────────────────────────────────────────────────────

/// Poll the server's `GET /tools` until it answers.
///
/// Retries with doubling delays per the policy. Exhaustion means the server
/// never became reachable and is reported as a launch failure. Note that a
/// caller racing this window from outside sees ordinary transport errors and
/// should retry rather than treat them as fatal.
pub async fn probe_ready(
    transport: &dyn Transport,
    name: &str,
    url: &str,
    policy: &ProbePolicy,
) -> Result<(), OrchestratorError> {
    let mut delay = policy.base_delay;
    let mut last_error = String::new();

    for attempt in 1..=policy.attempts {
        match transport.list_tools(name, url).await {
            Ok(_) => {
                tracing::debug!(server = name, url, attempt, "server ready");
                return Ok(());
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::trace!(server = name, attempt, error = %last_error, "not ready yet");
            }
        }
        if attempt < policy.attempts {
            sleep(delay).await;
            delay *= 2;
        }
    }

    Err(OrchestratorError::LaunchFailure {
        name: name.to_string(),
        reason: format!(
            "not ready after {} probes: {last_error}",
            policy.attempts
        ),
    })
}

// ─── Launch ──────────────────────────────────────────────────────────────────

/// Launch a server and register it as owned. Returns the endpoint url.
pub async fn launch(
    registry: &SharedRegistry,
    transport: &dyn Transport,
    name: &str,
    config: &ServerConfig,
) -> Result<String, OrchestratorError> {
    launch_with_policy(registry, transport, name, config, &ProbePolicy::default()).await
}

/// `launch` with an explicit probe policy.
pub async fn launch_with_policy(
    registry: &SharedRegistry,
    transport: &dyn Transport,
    name: &str,
    config: &ServerConfig,
    policy: &ProbePolicy,
) -> Result<String, OrchestratorError> {
    let endpoint = match &config.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => allocate_endpoint()
            .await
            .map_err(|e| OrchestratorError::LaunchFailure {
                name: name.to_string(),
                reason: format!("failed to allocate endpoint: {e}"),
            })?,
    };

    let mut child = spawn_server(name, config, &endpoint)?;
    tracing::info!(server = name, url = %endpoint, "spawned server process");

    if let Err(e) = probe_ready(transport, name, &endpoint, policy).await {
        // Never register a server that did not come up; kill what we spawned.
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(e);
    }

    registry
        .lock()
        .await
        .register_owned(name, &endpoint, child);
    Ok(endpoint)
}

// ─── Exit Monitoring ─────────────────────────────────────────────────────────

/// Start the background sweep that prunes exited servers from the registry.
///
/// Exits are logged; they are never surfaced as errors to in-flight calls
/// against other servers. The handle should be aborted on shutdown.
pub fn spawn_exit_monitor(registry: SharedRegistry, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let exited = registry.lock().await.reap_exited();
            for name in exited {
                tracing::warn!(server = %name, "pruned exited server from registry");
            }
        }
    })
}

// ─── Shutdown ────────────────────────────────────────────────────────────────

/// Terminate every owned server and reset persisted state.
///
/// Best-effort and idempotent: individual kill failures are logged inside
/// the sweep, and a second call finds an empty registry and an already-empty
/// state file.
pub async fn terminate_all(registry: &SharedRegistry, state: &dyn StateStore) {
    let killed = registry.lock().await.terminate_owned().await;
    tracing::info!(killed, "terminated owned servers");

    if let Err(e) = state.clear() {
        tracing::warn!(error = %e, "failed to reset persisted state");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::registry::ServerRegistry;
    use crate::state::{MemoryStateStore, StateStore};
    use crate::transport::HttpTransport;
    use crate::TokioMutex;

    fn fast_policy() -> ProbePolicy {
        ProbePolicy {
            attempts: 2,
            base_delay: Duration::from_millis(10),
        }
    }

    fn shared_registry() -> SharedRegistry {
        Arc::new(TokioMutex::new(ServerRegistry::new()))
    }

    fn config(command: &str, args: &[&str]) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn test_allocate_endpoint_yields_usable_url() {
        let url = allocate_endpoint().await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
        let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_launch_nonexistent_command_fails() {
        let registry = shared_registry();
        let transport = HttpTransport::with_timeout(Duration::from_secs(1));

        let err = launch_with_policy(
            &registry,
            &transport,
            "ghost",
            &config("definitely-not-a-real-command-1b2c", &[]),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::LaunchFailure { .. }));
        assert!(registry.lock().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_fails_when_server_never_listens() {
        let registry = shared_registry();
        let transport = HttpTransport::with_timeout(Duration::from_secs(1));

        // The child runs but never listens on the appended endpoint, so the
        // probe must exhaust.
        let err = launch_with_policy(
            &registry,
            &transport,
            "mute",
            &config("sleep", &["5"]),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        match err {
            OrchestratorError::LaunchFailure { name, reason } => {
                assert_eq!(name, "mute");
                assert!(reason.contains("not ready after 2 probes"), "{reason}");
            }
            other => panic!("expected LaunchFailure, got {other}"),
        }
        assert!(registry.lock().await.lookup("mute").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_monitor_prunes_killed_server() {
        let registry = shared_registry();

        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        registry
            .lock()
            .await
            .register_owned("victim", "http://127.0.0.1:1", child);

        let monitor = spawn_exit_monitor(registry.clone(), Duration::from_millis(20));

        std::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status()
            .unwrap();

        // Pruned within a few polling intervals.
        let mut pruned = false;
        for _ in 0..50 {
            sleep(Duration::from_millis(20)).await;
            if registry.lock().await.lookup("victim").is_none() {
                pruned = true;
                break;
            }
        }
        monitor.abort();
        assert!(pruned, "exited server was not pruned");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let registry = shared_registry();
        let state = MemoryStateStore::new();

        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        registry
            .lock()
            .await
            .register_owned("files", "http://127.0.0.1:1", child);
        state
            .save(&registry.lock().await.persistable())
            .unwrap();

        terminate_all(&registry, &state).await;
        assert!(registry.lock().await.is_empty());
        assert!(state.load().is_empty());

        // Second sweep: nothing to kill, state stays empty, no error.
        terminate_all(&registry, &state).await;
        assert!(state.load().is_empty());
    }
}
