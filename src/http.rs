//! HTTP ingest for the browser extension (feature `http`).
//!
//! The extension pushes session events and execution replies in, holds an
//! SSE stream per tab for outbound page commands, and long-polls a change
//! revision that downstream bridges use to re-list tools.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::{ExecutionReply, ExecutionRouter};
use crate::model::ContextId;
use crate::session::{ChangeNotifier, SessionCoordinator, SessionEvent};

/// How long `GET /changes` waits for a new revision before answering.
const LONG_POLL_WINDOW: Duration = Duration::from_secs(25);

/// Shared state behind the ingest routes.
#[derive(Clone)]
pub struct IngestState {
    coordinator: Arc<SessionCoordinator>,
    router: Arc<ExecutionRouter>,
    changes: watch::Receiver<u64>,
}

/// Notifier that bumps the change revision watched by `GET /changes`.
pub struct WatchNotifier(watch::Sender<u64>);

impl WatchNotifier {
    /// Create the notifier and the receiver half for the ingest router.
    pub fn channel() -> (Arc<Self>, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Arc::new(Self(tx)), rx)
    }
}

#[async_trait::async_trait]
impl ChangeNotifier for WatchNotifier {
    async fn tools_changed(&self) {
        self.0.send_modify(|revision| *revision += 1);
    }
}

/// Build the ingest router.
pub fn ingest_router(
    coordinator: Arc<SessionCoordinator>,
    router: Arc<ExecutionRouter>,
    changes: watch::Receiver<u64>,
) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/replies", post(post_reply))
        .route("/contexts/:context/commands", get(command_stream))
        .route("/changes", get(poll_changes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(IngestState {
            coordinator,
            router,
            changes,
        })
}

/// Serve the ingest API until the process exits.
pub async fn serve(addr: SocketAddr, router: Router) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "extension ingest listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn post_event(
    State(state): State<IngestState>,
    Json(event): Json<SessionEvent>,
) -> StatusCode {
    state.coordinator.handle_event(event);
    StatusCode::ACCEPTED
}

async fn post_reply(
    State(state): State<IngestState>,
    Json(reply): Json<ExecutionReply>,
) -> StatusCode {
    state.router.complete(reply);
    StatusCode::ACCEPTED
}

async fn command_stream(
    State(state): State<IngestState>,
    Path(context): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let commands = state.router.attach_context(ContextId(context));
    let stream = futures::stream::unfold(commands, |mut commands| async move {
        let command = commands.recv().await?;
        let event = Event::default().json_data(&command).ok()?;
        Some((Ok(event), commands))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    since: u64,
}

async fn poll_changes(
    State(state): State<IngestState>,
    Query(query): Query<ChangesQuery>,
) -> Json<serde_json::Value> {
    let mut changes = state.changes.clone();
    let _ = tokio::time::timeout(LONG_POLL_WINDOW, async {
        while *changes.borrow() <= query.since {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    Json(serde_json::json!({ "revision": *changes.borrow() }))
}
