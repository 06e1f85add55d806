//! Tool catalog.
//!
//! Aggregates capability descriptors from every known server into one
//! namespaced list. Qualified names are built by construction, `<server>.`
//! in front of the local name, so two servers exposing the same local tool
//! never collide and nothing is ever deduplicated at runtime.

use std::sync::{Arc, RwLock};

use futures::future::join_all;

use crate::schema::ParameterSchema;
use crate::transport::Transport;
use crate::types::ToolDeclaration;
use crate::TokioMutex;

/// A namespaced tool from some server's capability list.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    /// `<server>.<local-name>`, unique across the catalog.
    pub qualified_name: String,
    /// The owning server's name.
    pub server: String,
    /// Server-prefixed human description, `[<server>] <original>`.
    pub description: String,
    pub parameters: ParameterSchema,
}

/// Aggregated, namespaced view of every server's tools.
///
/// `refresh` replaces the snapshot wholesale; readers only ever observe a
/// complete snapshot, never a partially built one.
pub struct ToolCatalog {
    transport: Arc<dyn Transport>,
    snapshot: RwLock<Arc<Vec<CapabilityDescriptor>>>,
    /// Serializes refreshes: two racing refreshes apply in some order, each
    /// swapping in a complete snapshot, instead of interleaving.
    refresh_gate: TokioMutex<()>,
}

impl ToolCatalog {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            refresh_gate: TokioMutex::new(()),
        }
    }

    /// Poll every listed server and rebuild the catalog.
    ///
    /// Servers are polled concurrently. A server that fails its listing
    /// contributes zero descriptors this refresh and does not abort the
    /// others. Returns the size of the new snapshot.
    pub async fn refresh(&self, servers: &[(String, String)]) -> usize {
        let _gate = self.refresh_gate.lock().await;

        let polls = servers.iter().map(|(name, url)| {
            let transport = Arc::clone(&self.transport);
            async move { (name, poll_server(transport, name, url).await) }
        });

        let mut next = Vec::new();
        for (name, tools) in join_all(polls).await {
            for tool in tools {
                next.push(CapabilityDescriptor {
                    qualified_name: format!("{name}.{}", tool.name),
                    server: name.clone(),
                    description: format!("[{name}] {}", tool.description),
                    parameters: tool.parameters,
                });
            }
        }

        let count = next.len();
        *self.snapshot.write().expect("catalog lock") = Arc::new(next);
        tracing::debug!(tools = count, servers = servers.len(), "catalog refreshed");
        count
    }

    /// The most recently completed snapshot.
    pub fn list(&self) -> Vec<CapabilityDescriptor> {
        self.snapshot.read().expect("catalog lock").as_ref().clone()
    }

    /// Look up a descriptor by qualified name.
    pub fn find(&self, qualified_name: &str) -> Option<CapabilityDescriptor> {
        self.snapshot
            .read()
            .expect("catalog lock")
            .iter()
            .find(|d| d.qualified_name == qualified_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().expect("catalog lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Function-style declarations for the calling agent, derived 1:1 from
    /// the snapshot.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.snapshot
            .read()
            .expect("catalog lock")
            .iter()
            .map(|d| {
                ToolDeclaration::function(
                    d.qualified_name.clone(),
                    d.description.clone(),
                    d.parameters.clone(),
                )
            })
            .collect()
    }
}

/// One server's poll: listing failures are logged here and isolated to this
/// server.
async fn poll_server(
    transport: Arc<dyn Transport>,
    name: &str,
    url: &str,
) -> Vec<crate::types::ToolDescriptor> {
    match transport.list_tools(name, url).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!(server = name, error = %e, "tool listing failed, contributing no tools");
            Vec::new()
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
