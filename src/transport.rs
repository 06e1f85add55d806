//! HTTP control-channel transport.
//!
//! One trait seam between the orchestrator and the network: `list_tools`
//! maps to `GET /tools`, `execute` to `POST /execute`. The router and the
//! catalog depend on the trait, so tests can inject spies and fakes without
//! opening a socket.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use crate::errors::OrchestratorError;
use crate::types::{ExecuteRequest, ExecuteResponse, ToolDescriptor, ToolListResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total timeout for any single outbound call. On expiry the pending call is
/// abandoned client-side; no cancellation signal reaches the server.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// Control-channel operations against a single server endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the server's capability list.
    async fn list_tools(
        &self,
        server: &str,
        base_url: &str,
    ) -> Result<Vec<ToolDescriptor>, OrchestratorError>;

    /// Forward a tool call and return the server's response.
    async fn execute(
        &self,
        server: &str,
        base_url: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, OrchestratorError>;
}

// ─── HTTP Implementation ─────────────────────────────────────────────────────

/// Transport over plain HTTP with a fixed per-call timeout.
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self { http }
    }

    fn transport_error(server: &str, reason: String) -> OrchestratorError {
        OrchestratorError::TransportError {
            server: server.to_string(),
            reason,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn list_tools(
        &self,
        server: &str,
        base_url: &str,
    ) -> Result<Vec<ToolDescriptor>, OrchestratorError> {
        let url = format!("{}/tools", base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(server, format!("GET /tools failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::transport_error(
                server,
                format!("GET /tools returned {status}"),
            ));
        }

        let body: ToolListResponse = response.json().await.map_err(|e| {
            Self::transport_error(server, format!("failed to decode /tools response: {e}"))
        })?;

        Ok(body.tools)
    }

    async fn execute(
        &self,
        server: &str,
        base_url: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, OrchestratorError> {
        let url = format!("{}/execute", base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::transport_error(server, format!("POST /execute failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::transport_error(
                server,
                format!("POST /execute returned {status}"),
            ));
        }

        response.json().await.map_err(|e| {
            Self::transport_error(server, format!("failed to decode /execute response: {e}"))
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
