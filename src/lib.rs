//! Tooldock — client-side orchestrator for HTTP tool servers.
//!
//! Discovers, launches, and talks to independently running tool server
//! processes, and exposes their capabilities to a calling agent as one
//! namespaced tool list. Servers started by a previous orchestrator
//! instance are rejoined through a durable state file instead of being
//! launched twice.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod schema;
pub mod state;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::{CapabilityDescriptor, ToolCatalog};
pub use config::{ServerConfig, ServersConfig};
pub use errors::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use registry::{ServerRecord, ServerRegistry, SharedRegistry};
pub use router::InvocationRouter;
pub use schema::ParameterSchema;
pub use state::{FileStateStore, MemoryStateStore, PersistedServer, StateStore};
pub use transport::{HttpTransport, Transport};
pub use types::{
    FailureKind, InvocationFailure, InvocationRequest, InvocationResult, ToolDeclaration,
};

/// Async mutex for types that require `.await` inside their methods.
pub type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Return the platform-standard data directory for Tooldock.
///
/// Falls back to `~/.tooldock/` only if the platform data directory cannot
/// be resolved.
pub(crate) fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("tooldock");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".tooldock")
}

/// Initialize the tracing subscriber for embedders that want Tooldock's
/// default logging setup.
///
/// Honors `RUST_LOG`; defaults to info-level events from this crate and
/// warnings from everything else. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tooldock=info,warn"));

    let _ = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
