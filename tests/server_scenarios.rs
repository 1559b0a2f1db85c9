//! End-to-end MCP server scenarios.
//!
//! JSON-RPC 2.0 protocol compliance and tools/call routing, exercised
//! in-process against the server's message handler.

use std::sync::Arc;

use serde_json::{json, Value};

use pagetool_mcp::dispatch::{ExecutionReply, ExecutionRouter, PageCommand};
use pagetool_mcp::model::{AuthState, ContextId, DiscoveredTool, Origin, SourceTier, ToolSchema};
use pagetool_mcp::registry::ToolRegistry;
use pagetool_mcp::server::McpServer;

struct Harness {
    registry: Arc<ToolRegistry>,
    router: Arc<ExecutionRouter>,
    server: McpServer,
}

fn harness() -> Harness {
    let registry = Arc::new(ToolRegistry::new());
    let router = Arc::new(ExecutionRouter::new());
    let server = McpServer::new(Arc::clone(&registry), Arc::clone(&router));
    Harness {
        registry,
        router,
        server,
    }
}

fn discovered(name: &str) -> DiscoveredTool {
    DiscoveredTool {
        name: name.into(),
        description: format!("{name} on this site"),
        schema: ToolSchema::empty(),
        tier: SourceTier::SiteDeclaredMarkup,
        selector: None,
    }
}

impl Harness {
    fn register(&self, context: i64, origin: &str, name: &str, auth: AuthState) {
        self.registry
            .register(
                ContextId(context),
                origin,
                Origin::parse(origin).unwrap(),
                discovered(name),
                auth,
            )
            .unwrap();
    }

    async fn request(&self, id: u64, method: &str, params: Option<Value>) -> Value {
        let mut request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }
        let response = self
            .server
            .handle_message(&request.to_string())
            .await
            .expect("request should produce a response");
        serde_json::to_value(response).unwrap()
    }
}

fn result_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"].as_str().unwrap()
}

// ============================================================================
// Protocol compliance
// ============================================================================

#[tokio::test]
async fn test_initialize_handshake() {
    let harness = harness();

    let response = harness
        .request(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1.0"}
            })),
        )
        .await;

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert!(response.get("error").is_none());
    assert!(response["result"]["protocolVersion"].is_string());
    assert_eq!(response["result"]["serverInfo"]["name"], "pagetool-mcp");
    assert_eq!(
        response["result"]["capabilities"]["tools"]["listChanged"],
        true
    );

    let clients = harness.server.connected_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, "test-client");
}

#[tokio::test]
async fn test_initialize_succeeds_without_params() {
    let harness = harness();
    let response = harness.request(1, "initialize", None).await;
    assert!(response.get("error").is_none());
    assert!(response["result"]["serverInfo"]["version"].is_string());
}

#[tokio::test]
async fn test_ping_and_initialized_ack() {
    let harness = harness();

    let response = harness.request(2, "ping", None).await;
    assert!(response.get("error").is_none());
    assert_eq!(response["result"], json!({}));

    let response = harness.request(3, "notifications/initialized", None).await;
    assert!(response.get("error").is_none());

    // as a true notification there is no response at all
    let none = harness
        .server
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert!(none.is_none());
}

#[tokio::test]
async fn test_unknown_method_error() {
    let harness = harness();
    let response = harness.request(99, "nonexistent/method", None).await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn test_unknown_tool_is_a_tool_level_error() {
    let harness = harness();
    let response = harness
        .request(
            100,
            "tools/call",
            Some(json!({"name": "nowhere__nothing", "arguments": {}})),
        )
        .await;

    // not a protocol error: the agent can re-list and retry
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("unknown tool"));
}

// ============================================================================
// Scenario A: happy-path call through a live page
// ============================================================================

#[tokio::test]
async fn test_call_round_trip_through_live_context() {
    let harness = harness();
    harness.register(7, "https://a.test", "search", AuthState::Authenticated);

    let response = harness.request(1, "tools/list", None).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "a_test__search");
    assert_eq!(tools[0]["inputSchema"]["type"], "object");

    // the page side answers the next execution request
    let mut commands = harness.router.attach_context(ContextId(7));
    let responder = Arc::clone(&harness.router);
    tokio::spawn(async move {
        if let Some(PageCommand::Execute(request)) = commands.recv().await {
            assert_eq!(request.tool, "search");
            responder.complete(ExecutionReply {
                request_id: request.request_id,
                success: true,
                payload: json!({"results": ["first hit"]}),
                message: None,
            });
        }
    });

    let response = harness
        .request(
            2,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {"query": "rust"}})),
        )
        .await;

    assert!(response.get("error").is_none());
    assert!(response["result"].get("isError").is_none());
    assert!(result_text(&response).contains("first hit"));
}

// ============================================================================
// Scenario B: login-required short-circuits before dispatch
// ============================================================================

#[tokio::test]
async fn test_login_required_short_circuits_without_dispatch() {
    let harness = harness();
    harness.register(7, "https://a.test", "search", AuthState::LoginRequired);
    let mut commands = harness.router.attach_context(ContextId(7));

    let response = harness
        .request(
            1,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {}})),
        )
        .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("authentication"));
    // nothing was sent to the page
    assert!(commands.try_recv().is_err());
}

#[tokio::test]
async fn test_unbound_tool_reports_no_live_page() {
    let harness = harness();
    let origin = Origin::parse("https://a.test").unwrap();
    harness
        .registry
        .register_bundled(&origin, vec![discovered("search")]);

    // unbound entries are invisible to tools/list but a stale client may
    // still address one by name
    let response = harness
        .request(
            1,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {}})),
        )
        .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("no live page"));
}

// ============================================================================
// Scenario C: timeout leaves the registration intact
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_preserves_registration() {
    let harness = harness();
    harness.register(7, "https://a.test", "search", AuthState::Authenticated);
    let _commands = harness.router.attach_context(ContextId(7));

    let response = harness
        .request(
            1,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {}})),
        )
        .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("timed out"));
    // a slow page is not necessarily gone
    assert_eq!(harness.registry.get_all().len(), 1);
}

// ============================================================================
// Scenario D: a gone context unregisters eagerly
// ============================================================================

#[tokio::test]
async fn test_target_gone_unregisters_immediately() {
    let harness = harness();
    harness.register(7, "https://a.test", "search", AuthState::Authenticated);
    // context 7 never attached: dispatch fails at the transport level

    let response = harness
        .request(
            1,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {}})),
        )
        .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("gone"));
    assert!(harness.registry.get_all().is_empty());
}

#[tokio::test]
async fn test_execution_failure_surfaces_message() {
    let harness = harness();
    harness.register(7, "https://a.test", "search", AuthState::Authenticated);

    let mut commands = harness.router.attach_context(ContextId(7));
    let responder = Arc::clone(&harness.router);
    tokio::spawn(async move {
        if let Some(PageCommand::Execute(request)) = commands.recv().await {
            responder.complete(ExecutionReply {
                request_id: request.request_id,
                success: false,
                payload: Value::Null,
                message: Some("form submit blocked".into()),
            });
        }
    });

    let response = harness
        .request(
            1,
            "tools/call",
            Some(json!({"name": "a_test__search", "arguments": {}})),
        )
        .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(result_text(&response).contains("form submit blocked"));
    // an execution failure is not proof the page is gone
    assert_eq!(harness.registry.get_all().len(), 1);
}

#[tokio::test]
async fn test_invalid_call_params_is_a_protocol_error() {
    let harness = harness();
    let response = harness.request(1, "tools/call", None).await;
    assert_eq!(response["error"]["code"], -32602);
}
