//! MCP server implementation.
//!
//! Method dispatch over the JSON-RPC surface and the tools/call routing
//! algorithm. Requests are independent and stateless; the only side effect
//! is the diagnostic connected-clients list appended on `initialize`.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dispatch::{DispatchError, ExecutionRequest, ExecutionRouter};
use crate::error::codes;
use crate::model::{AuthState, Origin, ToolId};
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpMessage, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability,
};
use crate::registry::ToolRegistry;

/// MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name.
pub const SERVER_NAME: &str = "pagetool-mcp";

/// Server version.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Best-effort sink for tool-call outcomes (e.g. a community-registry
/// validation pipeline). Reports never block or affect the response
/// already returned to the agent.
#[async_trait::async_trait]
pub trait OutcomeReporter: Send + Sync {
    /// Record one call outcome.
    async fn report(&self, tool: &ToolId, origin: &Origin, success: bool);
}

/// MCP server over the tool registry.
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    router: Arc<ExecutionRouter>,
    connected_clients: Mutex<Vec<ClientInfo>>,
    reporter: Option<Arc<dyn OutcomeReporter>>,
}

impl McpServer {
    /// Create a server over a registry and an execution router.
    pub fn new(registry: Arc<ToolRegistry>, router: Arc<ExecutionRouter>) -> Self {
        Self {
            registry,
            router,
            connected_clients: Mutex::new(Vec::new()),
            reporter: None,
        }
    }

    /// Attach an outcome reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn OutcomeReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Clients that have called `initialize`, for diagnostics only.
    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        self.connected_clients.lock().clone()
    }

    /// Run the server on stdio.
    pub async fn run_stdio(&self) -> crate::Result<()> {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        let reader = BufReader::new(stdin.lock());

        tracing::info!("MCP server starting on stdio");

        for line in reader.lines() {
            let line = line?;

            if line.is_empty() {
                continue;
            }

            tracing::debug!("Received: {}", line);

            if let Some(response) = self.handle_message(&line).await {
                let json = serde_json::to_string(&response)?;
                tracing::debug!("Sending: {}", json);
                writeln!(stdout, "{}", json)?;
                stdout.flush()?;
            }
        }

        tracing::info!("MCP server shutting down");
        Ok(())
    }

    /// Handle an incoming message. Notifications produce no response.
    pub async fn handle_message(&self, json: &str) -> Option<JsonRpcResponse> {
        match McpMessage::parse(json) {
            Ok(McpMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(McpMessage::Notification(notification)) => {
                self.handle_notification(notification);
                None
            }
            Ok(McpMessage::Response(_)) => {
                // We don't expect responses in this direction
                None
            }
            Err(e) => Some(JsonRpcResponse::error(
                None,
                codes::PARSE_ERROR,
                e.to_string(),
            )),
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "notifications/initialized" => JsonRpcResponse::success(id, serde_json::json!({})),
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        }
    }

    fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    /// Handle initialize. Always succeeds; params are recorded when present.
    fn handle_initialize(
        &self,
        id: Option<JsonRpcId>,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();

        if let Some(client) = params.client_info {
            tracing::info!(client = %client.name, version = %client.version, "client connected");
            self.connected_clients.lock().push(client);
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.into(),
                version: SERVER_VERSION.into(),
            },
        };

        JsonRpcResponse::success(id, result)
    }

    fn handle_tools_list(&self, id: Option<JsonRpcId>) -> JsonRpcResponse {
        let tools = self.registry.to_protocol_list();
        JsonRpcResponse::success(id, ListToolsResult { tools })
    }

    async fn handle_tools_call(
        &self,
        id: Option<JsonRpcId>,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        codes::INVALID_PARAMS,
                        format!("invalid tool call params: {}", e),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    "tool call params required",
                );
            }
        };

        JsonRpcResponse::success(id, self.call_tool(params).await)
    }

    /// Resolve and dispatch one tool call.
    ///
    /// Every failure mode that the agent can act on comes back as a
    /// tool-level error result inside a successful protocol response.
    async fn call_tool(&self, params: ToolCallParams) -> ToolCallResult {
        let Some(tool) = self.registry.resolve_protocol_name(&params.name) else {
            return ToolCallResult::error(format!(
                "unknown tool: {}. Call tools/list for the current catalog.",
                params.name
            ));
        };

        if tool.auth == AuthState::LoginRequired {
            return ToolCallResult::error(format!(
                "{} requires authentication. Log in to {} in the browser, then retry.",
                params.name, tool.origin
            ));
        }

        let Some(context) = tool.context else {
            return ToolCallResult::error(format!(
                "no live page is open for {}. Visit the site to enable this tool.",
                tool.origin
            ));
        };

        let request = ExecutionRequest {
            request_id: Uuid::new_v4(),
            tool: tool.name.clone(),
            arguments: params.arguments,
            tier: tool.tier,
            selector: tool.selector.clone(),
        };

        let (result, success) = match self.router.execute(context, request).await {
            Ok(payload) => {
                let text = match payload {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (ToolCallResult::text(text), true)
            }
            Err(DispatchError::Timeout) => (
                // a slow page is not necessarily gone; registration stays
                ToolCallResult::error("execution timed out; the page may be slow or busy"),
                false,
            ),
            Err(DispatchError::Failed(msg)) => {
                (ToolCallResult::error(format!("execution failed: {msg}")), false)
            }
            Err(DispatchError::TargetGone(ctx)) => {
                // the failure itself proves the context is gone
                tracing::info!(context = %ctx, tool = %tool.id, "context gone, unregistering");
                self.registry.unregister(&tool.id);
                (
                    ToolCallResult::error(format!(
                        "the page for {} is gone and the tool was removed",
                        tool.origin
                    )),
                    false,
                )
            }
        };

        if let Some(reporter) = &self.reporter {
            let reporter = Arc::clone(reporter);
            let tool_id = tool.id.clone();
            let origin = tool.origin.clone();
            tokio::spawn(async move {
                reporter.report(&tool_id, &origin, success).await;
            });
        }

        result
    }
}
