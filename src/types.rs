//! Shared types for the orchestrator.
//!
//! Control-channel wire messages, the invocation request/result pair handed
//! to the calling agent, and the function-style capability export format.

use serde::{Deserialize, Serialize};

use crate::schema::ParameterSchema;

// ─── Control Channel (HTTP) ──────────────────────────────────────────────────

/// A single tool as reported by a server's `GET /tools` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

/// Response body of `GET /tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResponse {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Request body of `POST /execute`.
///
/// `name` is the server-local tool name; the server never sees the
/// orchestrator's qualified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Response body of `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub id: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

// ─── Invocation API ──────────────────────────────────────────────────────────

/// A tool call handed to the orchestrator by the calling agent.
///
/// `arguments` is an opaque serialized JSON string; the orchestrator parses
/// it at the boundary and forwards the parsed value to the owning server.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Caller-supplied correlation token, echoed back in the result.
    pub id: String,
    /// Fully qualified tool name, `<server>.<local-name>`.
    pub qualified_name: String,
    /// Serialized argument object.
    pub arguments: String,
}

/// Classification of an invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The qualified name had no separator or an empty component. Caller
    /// error, not retryable.
    MalformedName,
    /// The server-name component resolved to no registered server.
    UnknownServer,
    /// Argument payload rejected before forwarding (unparseable or schema
    /// mismatch).
    InvalidArguments,
    /// Network failure, timeout, cancellation, or a malformed response.
    /// May be transient; retry policy is the caller's.
    TransportError,
    /// The server answered with a mismatched correlation id.
    ProtocolViolation,
    /// The server itself reported the tool call as failed.
    ToolError,
}

/// Description of why an invocation failed.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// Result of a tool invocation.
///
/// Exactly one of `output` / `failure` is populated. Failures are values,
/// not errors: callers never need exception-style handling for normal
/// operational failures.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    /// Echoes the request's correlation id.
    pub id: String,
    pub output: Option<String>,
    pub failure: Option<InvocationFailure>,
    pub elapsed_ms: u64,
}

impl InvocationResult {
    /// Build a successful result.
    pub fn success(id: impl Into<String>, output: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            id: id.into(),
            output: Some(output.into()),
            failure: None,
            elapsed_ms,
        }
    }

    /// Build a failed result.
    pub fn failure(
        id: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            output: None,
            failure: Some(InvocationFailure {
                kind,
                detail: detail.into(),
            }),
            elapsed_ms,
        }
    }

    /// Whether the invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

// ─── Capability Export ───────────────────────────────────────────────────────

/// Function-style tool declaration handed to the calling agent.
///
/// Serializes as `{"type": "function", "function": {...}}`, one entry per
/// catalog descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub r#type: String,
    pub function: FunctionDeclaration,
}

/// Function payload within a tool declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolDeclaration {
    /// Wrap a qualified tool in the function declaration envelope.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDeclaration {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
