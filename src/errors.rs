//! Orchestrator error types.

use thiserror::Error;

/// Errors that can occur during orchestrator operations.
///
/// Failures in background work (exit monitoring, per-server catalog polls,
/// persistence I/O) are logged where they happen and never cross component
/// boundaries as errors. Only `invoke()` reports failures to its caller, and
/// it does so as a value inside a well-formed `InvocationResult`, classified
/// by [`FailureKind`](crate::types::FailureKind).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A server process failed to spawn or never became ready. The server
    /// never enters the registry.
    #[error("failed to launch server '{name}': {reason}")]
    LaunchFailure { name: String, reason: String },

    /// HTTP communication error (connect, timeout, malformed body).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// The durable state file could not be read or written. Logged, never
    /// fatal to orchestrator operation.
    #[error("persistence failure: {reason}")]
    PersistenceFailure { reason: String },

    /// Missing or invalid server configuration.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}
