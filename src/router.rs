//! Invocation routing.
//!
//! Resolves a qualified tool call to its owning server and forwards it over
//! the transport. Every outcome, including caller mistakes, comes back as a
//! well-formed `InvocationResult`; the router itself never returns an error
//! and never retries (at-most-once, exactly the transport's own semantics).

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::errors::OrchestratorError;
use crate::registry::SharedRegistry;
use crate::transport::Transport;
use crate::types::{ExecuteRequest, FailureKind, InvocationRequest, InvocationResult};

/// Split `<server>.<local-name>` on the first separator.
///
/// Returns `None` when there is no separator or either component is empty.
pub fn split_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    let (server, local) = qualified.split_once('.')?;
    if server.is_empty() || local.is_empty() {
        return None;
    }
    Some((server, local))
}

/// Dispatches qualified tool calls to their owning servers.
pub struct InvocationRouter {
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
}

impl InvocationRouter {
    pub fn new(registry: SharedRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Route an invocation to its server.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.invoke_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// `invoke` with cooperative cancellation: cancelling the token abandons
    /// the pending request deterministically and reports a transport
    /// failure. The server is not signalled.
    pub async fn invoke_with_cancel(
        &self,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        // 1. Parse the qualified name. No network call on caller error.
        let Some((server, local)) = split_qualified_name(&request.qualified_name) else {
            return InvocationResult::failure(
                request.id,
                FailureKind::MalformedName,
                format!(
                    "expected '<server>.<tool>', got '{}'",
                    request.qualified_name
                ),
                elapsed(start),
            );
        };

        // 2. Resolve the server; the lock is dropped before any network I/O.
        let Some(url) = self.registry.lock().await.url_for(server) else {
            return InvocationResult::failure(
                request.id,
                FailureKind::UnknownServer,
                format!("no registered server named '{server}'"),
                elapsed(start),
            );
        };

        // The payload is opaque to the catalog but must at least be JSON to
        // go on the wire.
        let arguments: serde_json::Value = match serde_json::from_str(&request.arguments) {
            Ok(value) => value,
            Err(e) => {
                return InvocationResult::failure(
                    request.id,
                    FailureKind::InvalidArguments,
                    format!("argument payload is not valid JSON: {e}"),
                    elapsed(start),
                );
            }
        };

        // 3. Forward, racing the caller's cancellation token.
        let execute = ExecuteRequest {
            id: request.id.clone(),
            name: local.to_string(),
            arguments,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(server, tool = local, "invocation cancelled by caller");
                return InvocationResult::failure(
                    request.id,
                    FailureKind::TransportError,
                    "cancelled by caller",
                    elapsed(start),
                );
            }
            outcome = self.transport.execute(server, &url, &execute) => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(OrchestratorError::TransportError { reason, .. }) => {
                return InvocationResult::failure(
                    request.id,
                    FailureKind::TransportError,
                    reason,
                    elapsed(start),
                );
            }
            Err(e) => {
                return InvocationResult::failure(
                    request.id,
                    FailureKind::TransportError,
                    e.to_string(),
                    elapsed(start),
                );
            }
        };

        // 4. The response must echo our correlation id; anything else means
        // the server cannot be trusted for this call.
        if response.id != request.id {
            let detail = format!(
                "server '{server}' answered id '{}' to request id '{}'",
                response.id, request.id
            );
            return InvocationResult::failure(
                request.id,
                FailureKind::ProtocolViolation,
                detail,
                elapsed(start),
            );
        }

        // Server-reported failure passes through verbatim.
        if let Some(error) = response.error {
            return InvocationResult::failure(
                request.id,
                FailureKind::ToolError,
                error,
                elapsed(start),
            );
        }

        match response.result {
            Some(serde_json::Value::String(output)) => {
                InvocationResult::success(request.id, output, elapsed(start))
            }
            Some(value) => InvocationResult::success(
                request.id,
                value.to_string(),
                elapsed(start),
            ),
            // 5. Missing both result and error is a malformed response.
            None => InvocationResult::failure(
                request.id,
                FailureKind::TransportError,
                "response carried neither result nor error",
                elapsed(start),
            ),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::registry::ServerRegistry;
    use crate::types::{ExecuteResponse, ToolDescriptor};
    use crate::TokioMutex;

    /// Counts transport calls and answers from a canned script.
    struct SpyTransport {
        calls: AtomicUsize,
        respond: Box<dyn Fn(&ExecuteRequest) -> Result<ExecuteResponse, OrchestratorError> + Send + Sync>,
    }

    impl SpyTransport {
        fn new(
            respond: impl Fn(&ExecuteRequest) -> Result<ExecuteResponse, OrchestratorError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for SpyTransport {
        async fn list_tools(
            &self,
            _server: &str,
            _base_url: &str,
        ) -> Result<Vec<ToolDescriptor>, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn execute(
            &self,
            _server: &str,
            _base_url: &str,
            request: &ExecuteRequest,
        ) -> Result<ExecuteResponse, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(request)
        }
    }

    async fn router_with(
        transport: Arc<SpyTransport>,
        servers: &[(&str, &str)],
    ) -> InvocationRouter {
        let mut registry = ServerRegistry::new();
        for (name, url) in servers {
            registry.register_discovered(name, "token", url);
        }
        InvocationRouter::new(Arc::new(TokioMutex::new(registry)), transport)
    }

    fn request(qualified_name: &str) -> InvocationRequest {
        InvocationRequest {
            id: "1".to_string(),
            qualified_name: qualified_name.to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn test_split_qualified_name() {
        assert_eq!(split_qualified_name("files.read"), Some(("files", "read")));
        // Split on the FIRST separator; the local name may contain dots.
        assert_eq!(split_qualified_name("a.b.c"), Some(("a", "b.c")));
        assert_eq!(split_qualified_name("noseparator"), None);
        assert_eq!(split_qualified_name(".read"), None);
        assert_eq!(split_qualified_name("files."), None);
        assert_eq!(split_qualified_name(""), None);
    }

    #[tokio::test]
    async fn test_malformed_name_makes_no_network_call() {
        let transport = SpyTransport::new(|_| unreachable!("must not be called"));
        let router = router_with(transport.clone(), &[("files", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("noseparator")).await;

        let failure = result.failure.expect("should fail");
        assert_eq!(failure.kind, FailureKind::MalformedName);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_server_makes_no_network_call() {
        let transport = SpyTransport::new(|_| unreachable!("must not be called"));
        let router = router_with(transport.clone(), &[("files", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("ghost.x")).await;

        let failure = result.failure.expect("should fail");
        assert_eq!(failure.kind, FailureKind::UnknownServer);
        assert!(failure.detail.contains("ghost"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_invocation_echoes_id() {
        let transport = SpyTransport::new(|req| {
            assert_eq!(req.name, "x");
            Ok(ExecuteResponse {
                id: req.id.clone(),
                result: Some(serde_json::json!("hello")),
                error: None,
            })
        });
        let router = router_with(transport.clone(), &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;

        assert_eq!(result.id, "1");
        assert_eq!(result.output.as_deref(), Some("hello"));
        assert!(result.failure.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_structured_result_is_serialized() {
        let transport = SpyTransport::new(|req| {
            Ok(ExecuteResponse {
                id: req.id.clone(),
                result: Some(serde_json::json!({"count": 3})),
                error: None,
            })
        });
        let router = router_with(transport, &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;
        assert_eq!(result.output.as_deref(), Some(r#"{"count":3}"#));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_a_protocol_violation() {
        let transport = SpyTransport::new(|_| {
            Ok(ExecuteResponse {
                id: "something-else".to_string(),
                result: Some(serde_json::json!("hello")),
                error: None,
            })
        });
        let router = router_with(transport, &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;
        assert_eq!(
            result.failure.unwrap().kind,
            FailureKind::ProtocolViolation
        );
    }

    #[tokio::test]
    async fn test_server_reported_error_passes_through() {
        let transport = SpyTransport::new(|req| {
            Ok(ExecuteResponse {
                id: req.id.clone(),
                result: None,
                error: Some("file not found".to_string()),
            })
        });
        let router = router_with(transport, &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ToolError);
        assert_eq!(failure.detail, "file not found");
    }

    #[tokio::test]
    async fn test_transport_error_is_tagged() {
        let transport = SpyTransport::new(|_| {
            Err(OrchestratorError::TransportError {
                server: "alpha".to_string(),
                reason: "connection reset".to_string(),
            })
        });
        let router = router_with(transport, &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::TransportError);
        assert!(failure.detail.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_rejected_before_forwarding() {
        let transport = SpyTransport::new(|_| unreachable!("must not be called"));
        let router = router_with(transport.clone(), &[("alpha", "http://127.0.0.1:1")]).await;

        let mut req = request("alpha.x");
        req.arguments = "{not json".to_string();
        let result = router.invoke(req).await;

        assert_eq!(result.failure.unwrap().kind, FailureKind::InvalidArguments);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_result_and_error_is_a_transport_error() {
        let transport = SpyTransport::new(|req| {
            Ok(ExecuteResponse {
                id: req.id.clone(),
                result: None,
                error: None,
            })
        });
        let router = router_with(transport, &[("alpha", "http://127.0.0.1:1")]).await;

        let result = router.invoke(request("alpha.x")).await;
        assert_eq!(result.failure.unwrap().kind, FailureKind::TransportError);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_aborts_before_dispatch() {
        let transport = SpyTransport::new(|req| {
            Ok(ExecuteResponse {
                id: req.id.clone(),
                result: Some(serde_json::json!("hello")),
                error: None,
            })
        });
        let router = router_with(transport.clone(), &[("alpha", "http://127.0.0.1:1")]).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = router.invoke_with_cancel(request("alpha.x"), &cancel).await;

        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::TransportError);
        assert!(failure.detail.contains("cancelled"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_request() {
        // A transport that never answers; only cancellation can finish this.
        struct StuckTransport;

        #[async_trait]
        impl Transport for StuckTransport {
            async fn list_tools(
                &self,
                _server: &str,
                _base_url: &str,
            ) -> Result<Vec<ToolDescriptor>, OrchestratorError> {
                Ok(Vec::new())
            }

            async fn execute(
                &self,
                _server: &str,
                _base_url: &str,
                _request: &ExecuteRequest,
            ) -> Result<ExecuteResponse, OrchestratorError> {
                futures::future::pending().await
            }
        }

        let mut registry = ServerRegistry::new();
        registry.register_discovered("alpha", "token", "http://127.0.0.1:1");
        let router =
            InvocationRouter::new(Arc::new(TokioMutex::new(registry)), Arc::new(StuckTransport));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = router.invoke_with_cancel(request("alpha.x"), &cancel).await;

        assert_eq!(result.failure.unwrap().kind, FailureKind::TransportError);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
