//! Execution dispatch: correlates tool-call requests sent into a page with
//! the page's eventual reply.
//!
//! Each call gets a fresh correlation id and exactly one outstanding
//! dispatch; the reply races a fixed timeout and the loser of the race is
//! discarded, never double-applied.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::model::{ContextId, SourceTier};

/// How long a page has to answer an execution request.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Message sent into a live page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageCommand {
    /// Execute a tool call.
    Execute(ExecutionRequest),
    /// Re-run discovery and report the page's full tool batch.
    Rediscover,
}

/// Outbound execution message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Correlation id tying the request to its reply.
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    /// Tool name within the origin.
    pub tool: String,
    /// Arguments supplied by the agent.
    pub arguments: serde_json::Value,
    /// Source tier of the tool definition.
    pub tier: SourceTier,
    /// Execution selector, opaque to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Inbound execution result from a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReply {
    /// Correlation id of the request this answers.
    #[serde(rename = "requestId")]
    pub request_id: Uuid,
    /// Whether the page carried out the action.
    pub success: bool,
    /// Result payload, opaque to the server.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Failure message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Dispatch failure modes. Exactly three terminal outcomes exist for a
/// dispatch: success with payload, execution error, timeout; `TargetGone`
/// is the transport-level failure that additionally proves the context no
/// longer exists.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The execution context no longer exists.
    #[error("execution context {0} is gone")]
    TargetGone(ContextId),
    /// The page reported a failure.
    #[error("execution failed: {0}")]
    Failed(String),
    /// The page did not answer within the timeout.
    #[error("execution timed out")]
    Timeout,
}

/// Routes commands to live execution contexts and correlates replies.
pub struct ExecutionRouter {
    channels: Mutex<HashMap<ContextId, mpsc::UnboundedSender<PageCommand>>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ExecutionReply>>>,
    timeout: Duration,
}

impl ExecutionRouter {
    /// Router with the default execution timeout.
    pub fn new() -> Self {
        Self::with_timeout(EXECUTION_TIMEOUT)
    }

    /// Router with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Attach a live context and return its command stream.
    ///
    /// Re-attaching replaces the previous stream; the old receiver ends.
    pub fn attach_context(&self, context: ContextId) -> mpsc::UnboundedReceiver<PageCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().insert(context, tx);
        tracing::debug!(context = %context, "execution context attached");
        rx
    }

    /// Detach a context; subsequent dispatches fail with `TargetGone`.
    pub fn detach_context(&self, context: ContextId) {
        self.channels.lock().remove(&context);
        tracing::debug!(context = %context, "execution context detached");
    }

    /// Whether a context currently has a live command stream.
    pub fn is_attached(&self, context: ContextId) -> bool {
        self.channels.lock().contains_key(&context)
    }

    /// Dispatch an execution request and await the correlated reply.
    pub async fn execute(
        &self,
        context: ContextId,
        request: ExecutionRequest,
    ) -> Result<serde_json::Value, DispatchError> {
        let request_id = request.request_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let sent = match self.channels.lock().get(&context) {
            Some(sender) => sender.send(PageCommand::Execute(request)).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.lock().remove(&request_id);
            self.channels.lock().remove(&context);
            return Err(DispatchError::TargetGone(context));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) if reply.success => Ok(reply.payload),
            Ok(Ok(reply)) => Err(DispatchError::Failed(
                reply.message.unwrap_or_else(|| "execution failed".into()),
            )),
            Ok(Err(_)) => Err(DispatchError::Failed("reply channel closed".into())),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(DispatchError::Timeout)
            }
        }
    }

    /// Deliver an inbound reply. Replies whose correlation id is unknown
    /// (already timed out, or duplicated) are discarded.
    pub fn complete(&self, reply: ExecutionReply) {
        match self.pending.lock().remove(&reply.request_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                tracing::debug!(request = %reply.request_id, "stale execution reply discarded");
            }
        }
    }

    /// Ask a context to re-run discovery. Best-effort; a missing context is
    /// not an error here.
    pub fn request_discovery(&self, context: ContextId) {
        if let Some(sender) = self.channels.lock().get(&context) {
            let _ = sender.send(PageCommand::Rediscover);
        }
    }
}

impl Default for ExecutionRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(tool: &str) -> ExecutionRequest {
        ExecutionRequest {
            request_id: Uuid::new_v4(),
            tool: tool.into(),
            arguments: json!({}),
            tier: SourceTier::HeuristicInferred,
            selector: None,
        }
    }

    #[tokio::test]
    async fn reply_resolves_dispatch() {
        let router = std::sync::Arc::new(ExecutionRouter::new());
        let mut commands = router.attach_context(ContextId(1));

        let responder = std::sync::Arc::clone(&router);
        tokio::spawn(async move {
            if let Some(PageCommand::Execute(req)) = commands.recv().await {
                responder.complete(ExecutionReply {
                    request_id: req.request_id,
                    success: true,
                    payload: json!({"rows": 3}),
                    message: None,
                });
            }
        });

        let payload = router.execute(ContextId(1), request("search")).await.unwrap();
        assert_eq!(payload["rows"], 3);
    }

    #[tokio::test]
    async fn failed_reply_surfaces_message() {
        let router = std::sync::Arc::new(ExecutionRouter::new());
        let mut commands = router.attach_context(ContextId(1));

        let responder = std::sync::Arc::clone(&router);
        tokio::spawn(async move {
            if let Some(PageCommand::Execute(req)) = commands.recv().await {
                responder.complete(ExecutionReply {
                    request_id: req.request_id,
                    success: false,
                    payload: serde_json::Value::Null,
                    message: Some("element not found".into()),
                });
            }
        });

        let err = router.execute(ContextId(1), request("search")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Failed(msg) if msg.contains("element not found")));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_dispatch_times_out() {
        let router = ExecutionRouter::new();
        let _commands = router.attach_context(ContextId(1));

        let req = request("search");
        let stale_id = req.request_id;
        let err = router.execute(ContextId(1), req).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout));

        // a reply arriving after the race is lost is discarded quietly
        router.complete(ExecutionReply {
            request_id: stale_id,
            success: true,
            payload: json!({}),
            message: None,
        });
    }

    #[tokio::test]
    async fn missing_context_is_target_gone() {
        let router = ExecutionRouter::new();
        let err = router.execute(ContextId(9), request("search")).await.unwrap_err();
        assert!(matches!(err, DispatchError::TargetGone(ContextId(9))));

        let rx = router.attach_context(ContextId(9));
        drop(rx);
        let err = router.execute(ContextId(9), request("search")).await.unwrap_err();
        assert!(matches!(err, DispatchError::TargetGone(ContextId(9))));
        assert!(!router.is_attached(ContextId(9)));
    }
}
