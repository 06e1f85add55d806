//! Orchestrator facade.
//!
//! Ties the registry, process supervisor, catalog, and router together
//! behind one handle. Construction restores servers a prior instance left
//! running; `start_all` launches the configured set; `invoke` validates the
//! argument payload against the catalog schema before the router forwards
//! anything over the wire.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CapabilityDescriptor, ToolCatalog};
use crate::config::{ServerConfig, ServersConfig};
use crate::errors::OrchestratorError;
use crate::lifecycle::{self, ProbePolicy, EXIT_POLL_INTERVAL};
use crate::registry::{ServerRegistry, SharedRegistry};
use crate::router::InvocationRouter;
use crate::state::StateStore;
use crate::transport::{HttpTransport, Transport};
use crate::types::{FailureKind, InvocationRequest, InvocationResult, ToolDeclaration};
use crate::TokioMutex;

/// High-level orchestrator for a set of HTTP tool servers.
pub struct Orchestrator {
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
    catalog: ToolCatalog,
    router: InvocationRouter,
    state: Arc<dyn StateStore>,
    configs: HashMap<String, ServerConfig>,
    probe_policy: ProbePolicy,
    monitor: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build an orchestrator with the default HTTP transport.
    ///
    /// Servers recorded by a previous instance are restored from the state
    /// store as discovered (reachable, not owned). A broken store restores
    /// nothing and never blocks construction.
    pub fn new(config: ServersConfig, state: Arc<dyn StateStore>) -> Self {
        Self::with_transport(config, state, Arc::new(HttpTransport::new()))
    }

    /// `new` with an injected transport, for tests and custom stacks.
    pub fn with_transport(
        config: ServersConfig,
        state: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut registry = ServerRegistry::new();
        for (name, persisted) in state.load() {
            registry.register_discovered(&name, &persisted.id, &persisted.url);
        }
        let registry: SharedRegistry = Arc::new(TokioMutex::new(registry));

        Self {
            catalog: ToolCatalog::new(Arc::clone(&transport)),
            router: InvocationRouter::new(Arc::clone(&registry), Arc::clone(&transport)),
            registry,
            transport,
            state,
            configs: config.servers,
            probe_policy: ProbePolicy::default(),
            monitor: None,
        }
    }

    /// Override the readiness probe policy for subsequent launches.
    pub fn set_probe_policy(&mut self, policy: ProbePolicy) {
        self.probe_policy = policy;
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Launch every configured server concurrently.
    ///
    /// Returns the servers that failed to launch; partial startup is
    /// acceptable and the failures are also logged. On return the registry
    /// has been persisted and the exit monitor is running.
    pub async fn start_all(&mut self) -> Vec<(String, OrchestratorError)> {
        let launches = self.configs.iter().map(|(name, config)| {
            let registry = Arc::clone(&self.registry);
            let transport = Arc::clone(&self.transport);
            let policy = self.probe_policy.clone();
            let name = name.clone();
            let config = config.clone();
            async move {
                let result = lifecycle::launch_with_policy(
                    &registry,
                    transport.as_ref(),
                    &name,
                    &config,
                    &policy,
                )
                .await;
                (name, result)
            }
        });

        let mut errors = Vec::new();
        for (name, result) in join_all(launches).await {
            if let Err(e) = result {
                tracing::warn!(server = %name, error = %e, "server failed to launch");
                errors.push((name, e));
            }
        }

        self.persist_state().await;
        self.ensure_monitor();
        errors
    }

    /// Launch one configured server by name.
    pub async fn start_server(&mut self, name: &str) -> Result<(), OrchestratorError> {
        let config = self
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::ConfigError {
                reason: format!("no configuration for server '{name}'"),
            })?;

        lifecycle::launch_with_policy(
            &self.registry,
            self.transport.as_ref(),
            name,
            &config,
            &self.probe_policy,
        )
        .await?;

        self.persist_state().await;
        self.ensure_monitor();
        Ok(())
    }

    /// Stop one server, killing its process when owned.
    pub async fn stop_server(&self, name: &str) -> bool {
        let stopped = self.registry.lock().await.stop_server(name).await;
        if stopped {
            self.persist_state().await;
        }
        stopped
    }

    /// Terminate every owned server and reset persisted state. Idempotent.
    pub async fn shutdown_all(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        lifecycle::terminate_all(&self.registry, self.state.as_ref()).await;
    }

    fn ensure_monitor(&mut self) {
        if self.monitor.is_none() {
            self.monitor = Some(lifecycle::spawn_exit_monitor(
                Arc::clone(&self.registry),
                EXIT_POLL_INTERVAL,
            ));
        }
    }

    /// Write the current registry to the state store. Persistence problems
    /// are logged, never fatal.
    async fn persist_state(&self) {
        let snapshot = self.registry.lock().await.persistable();
        if let Err(e) = self.state.save(&snapshot) {
            tracing::warn!(error = %e, "failed to persist registry state");
        }
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// Re-poll every known server's capability list.
    pub async fn refresh_tools(&self) -> usize {
        let endpoints = self.registry.lock().await.endpoints();
        self.catalog.refresh(&endpoints).await
    }

    /// The current catalog snapshot.
    pub fn tools(&self) -> Vec<CapabilityDescriptor> {
        self.catalog.list()
    }

    /// Function-style declarations for the calling agent.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.catalog.declarations()
    }

    // ─── Invocation ──────────────────────────────────────────────────────

    /// Route a tool call to its owning server.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.invoke_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// `invoke` with cooperative cancellation.
    ///
    /// When the catalog knows the tool, the argument payload is validated
    /// against its schema here, at the boundary, so nothing malformed is
    /// forwarded. Tools the catalog has not (yet) seen pass through; the
    /// router still resolves the server or reports the failure.
    pub async fn invoke_with_cancel(
        &self,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        if let Some(descriptor) = self.catalog.find(&request.qualified_name) {
            let arguments: serde_json::Value = match serde_json::from_str(&request.arguments) {
                Ok(value) => value,
                Err(e) => {
                    return InvocationResult::failure(
                        request.id,
                        FailureKind::InvalidArguments,
                        format!("argument payload is not valid JSON: {e}"),
                        0,
                    );
                }
            };
            if let Err(reason) = descriptor.parameters.validate(&arguments) {
                return InvocationResult::failure(
                    request.id,
                    FailureKind::InvalidArguments,
                    reason,
                    0,
                );
            }
        }

        self.router.invoke_with_cancel(request, cancel).await
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Shared registry handle, for callers that need direct lookups.
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub async fn running_server_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn owned_server_count(&self) -> usize {
        self.registry.lock().await.owned_count()
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.registry.lock().await.server_names()
    }

    pub fn tool_count(&self) -> usize {
        self.catalog.len()
    }

    /// Names of all configured servers, launched or not.
    pub fn configured_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // The monitor task must not outlive the orchestrator. Owned server
        // processes deliberately do: without shutdown_all(), the persisted
        // state lets the next instance rejoin them.
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
