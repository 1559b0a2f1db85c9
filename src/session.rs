//! Session coordination: feeds tab lifecycle events and per-page tool
//! batches into the registry, and keeps the best-effort snapshot fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::dispatch::ExecutionRouter;
use crate::model::{AuthState, ContextId, DiscoveredTool, Origin, ToolId};
use crate::registry::ToolRegistry;
use crate::snapshot::SnapshotStore;

/// How often the catalog is persisted when non-empty.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet period used to coalesce bursts of registry changes into one
/// outbound notification.
pub const NOTIFY_QUIET_PERIOD: Duration = Duration::from_millis(400);

/// How stale a context's tools may get before a re-discovery request.
pub const REVERIFY_INTERVAL: Duration = Duration::from_secs(300);

/// Origin prefixes that never reach the registry (internal browser pages).
pub const BLOCKED_ORIGIN_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "moz-extension://",
    "about:",
    "devtools://",
    "view-source:",
];

/// Whether an origin string is on the blocked prefix list.
pub fn is_blocked_origin(origin: &str) -> bool {
    BLOCKED_ORIGIN_PREFIXES
        .iter()
        .any(|prefix| origin.starts_with(prefix))
}

/// A page's full tool batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    /// Reporting context.
    pub context: ContextId,
    /// Page URL at report time.
    pub url: String,
    /// Origin as reported, unparsed.
    pub origin: String,
    /// All tools the page currently exposes.
    #[serde(default)]
    pub tools: Vec<DiscoveredTool>,
    /// Authentication state observed on the page.
    pub auth: AuthState,
}

/// Events arriving from the browser side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// A tab was closed; its tools enter the grace period.
    TabClosed {
        /// Closed context.
        context: ContextId,
    },
    /// A tab navigated to a new URL.
    TabNavigated {
        /// Navigating context.
        context: ContextId,
        /// Destination URL.
        url: String,
    },
    /// A navigated tab finished loading; re-discovery can run.
    PageLoaded {
        /// Loaded context.
        context: ContextId,
    },
    /// Full tool batch from one page.
    PageReport(PageReport),
    /// A single tool appeared after initial load.
    ToolAdded {
        /// Reporting context.
        context: ContextId,
        /// Page URL.
        url: String,
        /// Origin as reported, unparsed.
        origin: String,
        /// The tool.
        tool: DiscoveredTool,
        /// Authentication state observed on the page.
        auth: AuthState,
    },
    /// A single tool disappeared.
    ToolRemoved {
        /// Origin as reported, unparsed.
        origin: String,
        /// Tool name within the origin.
        name: String,
    },
    /// The page's authentication state changed.
    AuthChanged {
        /// Origin as reported, unparsed.
        origin: String,
        /// New state.
        auth: AuthState,
    },
}

/// Outbound sink for the coalesced "tool list changed" signal.
///
/// Best-effort: failures are logged and swallowed, never propagated.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// The tool list changed since the last notification.
    async fn tools_changed(&self);
}

/// Notifier that only logs.
pub struct LogNotifier;

#[async_trait]
impl ChangeNotifier for LogNotifier {
    async fn tools_changed(&self) {
        tracing::debug!("tool list changed");
    }
}

/// Bridges browser-side events into registry operations.
pub struct SessionCoordinator {
    registry: Arc<ToolRegistry>,
    router: Arc<ExecutionRouter>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl SessionCoordinator {
    /// Create a coordinator and wire the debounced change notification.
    pub fn new(
        registry: Arc<ToolRegistry>,
        router: Arc<ExecutionRouter>,
        store: Option<Arc<dyn SnapshotStore>>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.on_change(move || {
            let _ = tx.send(());
        });
        tokio::spawn(debounce_changes(rx, notifier));

        Arc::new(Self {
            registry,
            router,
            store,
        })
    }

    /// Restore the snapshot and start the periodic background tasks.
    ///
    /// Called after bundled definitions are registered, so the restore's
    /// insert-only-if-absent rule preserves live/bundle precedence.
    pub async fn start(self: &Arc<Self>) {
        if let Some(store) = &self.store {
            match store.load().await {
                Ok(Some(snapshot)) => {
                    tracing::info!(entries = snapshot.len(), "restoring catalog snapshot");
                    self.registry.restore(snapshot);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot restore failed, starting empty");
                }
            }
        }

        if let Some(store) = self.store.clone() {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if registry.is_empty() {
                        continue;
                    }
                    if let Err(e) = store.save(&registry.serialize()).await {
                        tracing::warn!(error = %e, "snapshot save failed");
                    }
                }
            });
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REVERIFY_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                coordinator.reverify_stale_contexts();
            }
        });
    }

    /// Handle one browser-side event.
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::TabClosed { context } => {
                self.registry.on_tab_closed(context);
            }
            SessionEvent::TabNavigated { context, url } => {
                self.registry.on_tab_navigated(context, &url);
            }
            SessionEvent::PageLoaded { context } => {
                self.router.request_discovery(context);
            }
            SessionEvent::PageReport(report) => {
                self.handle_page_report(report);
            }
            SessionEvent::ToolAdded {
                context,
                url,
                origin,
                tool,
                auth,
            } => {
                if is_blocked_origin(&origin) {
                    return;
                }
                if let Some(origin) = Origin::parse(&origin) {
                    let _ = self.registry.register(context, &url, origin, tool, auth);
                }
            }
            SessionEvent::ToolRemoved { origin, name } => {
                if let Some(origin) = Origin::parse(&origin) {
                    self.registry.unregister(&ToolId::derive(&origin, &name));
                }
            }
            SessionEvent::AuthChanged { origin, auth } => {
                if let Some(origin) = Origin::parse(&origin) {
                    self.registry.update_auth_state(&origin, auth);
                }
            }
        }
    }

    /// Reconcile a page's full tool batch into the registry.
    fn handle_page_report(&self, report: PageReport) {
        if is_blocked_origin(&report.origin) {
            tracing::trace!(origin = %report.origin, "blocked origin report ignored");
            return;
        }
        let Some(origin) = Origin::parse(&report.origin) else {
            tracing::warn!(origin = %report.origin, "unparseable origin in page report");
            return;
        };

        // same-scan precedence: on a name collision the higher tier wins
        let mut batch: HashMap<String, DiscoveredTool> = HashMap::new();
        for tool in report.tools {
            match batch.get(&tool.name) {
                Some(existing) if existing.tier >= tool.tier => {}
                _ => {
                    batch.insert(tool.name.clone(), tool);
                }
            }
        }

        if self.registry.has_bundled(&origin) {
            self.registry
                .bind_bundled_to_context(&origin, report.context, report.auth);
            // site-declared tools are higher fidelity than the bundle and
            // coexist with it; heuristics defer to the curated definitions
            for tool in batch.into_values().filter(|t| t.tier.is_site_declared()) {
                let _ = self.registry.register(
                    report.context,
                    &report.url,
                    origin.clone(),
                    tool,
                    report.auth,
                );
            }
        } else {
            // replace this context's view of this origin; tools owned by
            // other contexts at the same origin stay untouched
            for tool in self
                .registry
                .get_by_context(report.context)
                .into_iter()
                .filter(|t| t.origin == origin)
            {
                if !batch.contains_key(&tool.name) {
                    self.registry.unregister(&tool.id);
                }
            }
            for tool in batch.into_values() {
                let _ = self.registry.register(
                    report.context,
                    &report.url,
                    origin.clone(),
                    tool,
                    report.auth,
                );
            }
        }
    }

    fn reverify_stale_contexts(&self) {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(REVERIFY_INTERVAL).unwrap_or(chrono::Duration::zero());
        let mut stale: Vec<ContextId> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|t| t.last_verified_at < cutoff)
            .filter_map(|t| t.context)
            .collect();
        stale.sort_by_key(|c| c.0);
        stale.dedup();
        for context in stale {
            self.router.request_discovery(context);
        }
    }
}

async fn debounce_changes(
    mut rx: mpsc::UnboundedReceiver<()>,
    notifier: Arc<dyn ChangeNotifier>,
) {
    while rx.recv().await.is_some() {
        // absorb the burst until a quiet period passes
        loop {
            match tokio::time::timeout(NOTIFY_QUIET_PERIOD, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        notifier.tools_changed().await;
    }
}
