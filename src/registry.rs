//! The tool catalog: registration, capacity limits, tab-lifecycle cleanup,
//! protocol naming and change notification.
//!
//! The registry is the exclusive owner of the catalog. Tabs push tool
//! observations in through the session coordinator; the protocol server
//! reads the catalog out on demand. Mutations and the listener invocations
//! they trigger run under synchronous locks so that a listener always
//! observes the catalog state the mutation left behind.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::model::{
    AuthState, ContextId, DiscoveredTool, Origin, RegisteredTool, SourceTier, ToolId,
};
use crate::protocol::ToolDefinition;

/// Maximum number of catalog entries per origin.
pub const MAX_TOOLS_PER_ORIGIN: usize = 40;

/// Maximum number of catalog entries overall.
pub const MAX_TOTAL_TOOLS: usize = 400;

/// Delay between a context disappearing and its tools being removed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(30);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`ToolRegistry::on_change`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The concurrent tool catalog.
pub struct ToolRegistry {
    catalog: RwLock<HashMap<ToolId, RegisteredTool>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    pending_removals: Mutex<HashMap<ToolId, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            pending_removals: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Register a tool reported by a live page.
    ///
    /// Returns `None` when the global or per-origin cap would be exceeded
    /// (checked before any mutation; an overwrite of an existing identifier
    /// never trips the caps). A pending grace-period removal for the same
    /// identifier is cancelled. Overwrites refresh content and the context
    /// binding but keep the original discovery timestamp.
    pub fn register(
        &self,
        context: ContextId,
        url: &str,
        origin: Origin,
        discovered: DiscoveredTool,
        auth: AuthState,
    ) -> Option<RegisteredTool> {
        let id = ToolId::derive(&origin, &discovered.name);
        self.cancel_pending_removal(&id);

        let tool = {
            let mut catalog = self.catalog.write();
            if !catalog.contains_key(&id) && !Self::capacity_allows(&catalog, &origin) {
                return None;
            }
            let mut tool =
                RegisteredTool::from_discovered(context, url, origin, discovered, auth);
            if let Some(existing) = catalog.get(&id) {
                tool.discovered_at = existing.discovered_at;
            }
            catalog.insert(id, tool.clone());
            tool
        };

        self.notify();
        Some(tool)
    }

    /// Register shipped-bundle definitions for an origin.
    ///
    /// Entries start unbound and are never surfaced to agents until
    /// [`bind_bundled_to_context`](Self::bind_bundled_to_context) runs.
    /// An identifier that already exists is left alone: live discovery wins.
    pub fn register_bundled(&self, origin: &Origin, tools: Vec<DiscoveredTool>) {
        let mut added = false;
        {
            let mut catalog = self.catalog.write();
            for discovered in tools {
                let id = ToolId::derive(origin, &discovered.name);
                if catalog.contains_key(&id) {
                    continue;
                }
                if !Self::capacity_allows(&catalog, origin) {
                    break;
                }
                catalog.insert(id, RegisteredTool::from_bundle(origin.clone(), discovered));
                added = true;
            }
        }
        if added {
            self.notify();
        }
    }

    /// Bind every bundle-sourced entry at `origin` to a live context.
    ///
    /// This is how a bundled definition becomes callable once the user
    /// visits the matching site.
    pub fn bind_bundled_to_context(&self, origin: &Origin, context: ContextId, auth: AuthState) {
        let mut changed = false;
        {
            let mut catalog = self.catalog.write();
            for tool in catalog.values_mut() {
                if tool.origin == *origin && tool.tier == SourceTier::ShippedBundle {
                    tool.context = Some(context);
                    tool.auth = auth;
                    tool.last_verified_at = Utc::now();
                    changed = true;
                }
            }
        }
        if changed {
            self.notify();
        }
    }

    /// Remove an entry immediately.
    pub fn unregister(&self, id: &ToolId) {
        self.cancel_pending_removal(id);
        let removed = self.catalog.write().remove(id).is_some();
        if removed {
            tracing::debug!(id = %id, "tool unregistered");
            self.notify();
        }
    }

    /// Look up an entry by identifier.
    pub fn get(&self, id: &ToolId) -> Option<RegisteredTool> {
        self.catalog.read().get(id).cloned()
    }

    /// All entries belonging to an origin.
    pub fn get_by_origin(&self, origin: &Origin) -> Vec<RegisteredTool> {
        self.catalog
            .read()
            .values()
            .filter(|t| t.origin == *origin)
            .cloned()
            .collect()
    }

    /// All entries owned by a context.
    pub fn get_by_context(&self, context: ContextId) -> Vec<RegisteredTool> {
        self.catalog
            .read()
            .values()
            .filter(|t| t.context == Some(context))
            .cloned()
            .collect()
    }

    /// All entries.
    pub fn get_all(&self) -> Vec<RegisteredTool> {
        self.catalog.read().values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }

    /// Whether any shipped-bundle entry exists for the origin.
    pub fn has_bundled(&self, origin: &Origin) -> bool {
        self.catalog
            .read()
            .values()
            .any(|t| t.origin == *origin && t.tier == SourceTier::ShippedBundle)
    }

    /// Protocol-facing tool definitions.
    ///
    /// Unbound entries are filtered out: a tool with no live page cannot be
    /// called and is never surfaced to agents. Output is sorted by name so
    /// repeated listings are stable.
    pub fn to_protocol_list(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .catalog
            .read()
            .values()
            .filter(|t| t.context.is_some())
            .map(|t| ToolDefinition {
                name: t.protocol_name(),
                description: t.description.clone(),
                input_schema: t.schema.to_json_schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Inverse of the protocol-name mapping.
    ///
    /// An O(n) scan; the catalog is bounded by [`MAX_TOTAL_TOOLS`].
    pub fn resolve_protocol_name(&self, name: &str) -> Option<RegisteredTool> {
        self.catalog
            .read()
            .values()
            .find(|t| t.protocol_name() == name)
            .cloned()
    }

    /// Schedule grace-period removal of every entry owned by a context.
    ///
    /// The tab may be reopened on the same page; re-registration before the
    /// grace period elapses cancels the removal.
    pub fn on_tab_closed(self: &Arc<Self>, context: ContextId) {
        let owned: Vec<ToolId> = self
            .catalog
            .read()
            .values()
            .filter(|t| t.context == Some(context))
            .map(|t| t.id.clone())
            .collect();
        tracing::debug!(context = %context, tools = owned.len(), "tab closed, scheduling removal");
        for id in owned {
            self.schedule_removal(id);
        }
    }

    /// Immediately remove entries owned by a context whose origin differs
    /// from the new URL's origin. The old page is gone now; no grace period.
    pub fn on_tab_navigated(&self, context: ContextId, new_url: &str) {
        let new_origin = Origin::parse(new_url);
        let removed = {
            let mut catalog = self.catalog.write();
            let stale: Vec<ToolId> = catalog
                .values()
                .filter(|t| t.context == Some(context) && Some(&t.origin) != new_origin.as_ref())
                .map(|t| t.id.clone())
                .collect();
            for id in &stale {
                catalog.remove(id);
            }
            stale
        };
        if !removed.is_empty() {
            tracing::debug!(context = %context, removed = removed.len(), "tab navigated away");
            self.notify();
        }
    }

    /// Bulk auth-state update for an origin. Notifies only when something
    /// actually changed.
    pub fn update_auth_state(&self, origin: &Origin, auth: AuthState) {
        let mut changed = false;
        {
            let mut catalog = self.catalog.write();
            for tool in catalog.values_mut() {
                if tool.origin == *origin && tool.auth != auth {
                    tool.auth = auth;
                    changed = true;
                }
            }
        }
        if changed {
            self.notify();
        }
    }

    /// Subscribe to change notifications.
    ///
    /// Listeners run synchronously, in registration order, after every
    /// mutation that altered catalog contents. A panicking listener is
    /// isolated and does not prevent the others from running.
    pub fn on_change(&self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        SubscriptionId(id)
    }

    /// Drop a change subscription.
    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        self.listeners.lock().retain(|(id, _)| *id != subscription.0);
    }

    /// Snapshot of the full catalog.
    pub fn serialize(&self) -> Vec<RegisteredTool> {
        self.get_all()
    }

    /// Merge a snapshot back in.
    ///
    /// Only identifiers not already present are added, so entries created
    /// synchronously at startup (the bundle) are never clobbered. Identifiers
    /// are recomputed from `(origin, name)` to hold the catalog invariant
    /// against stale or hand-edited snapshots.
    pub fn restore(&self, snapshot: Vec<RegisteredTool>) {
        let mut added = false;
        {
            let mut catalog = self.catalog.write();
            for mut tool in snapshot {
                tool.id = ToolId::derive(&tool.origin, &tool.name);
                if catalog.contains_key(&tool.id) {
                    continue;
                }
                if !Self::capacity_allows(&catalog, &tool.origin) {
                    continue;
                }
                catalog.insert(tool.id.clone(), tool);
                added = true;
            }
        }
        if added {
            self.notify();
        }
    }

    fn capacity_allows(catalog: &HashMap<ToolId, RegisteredTool>, origin: &Origin) -> bool {
        if catalog.len() >= MAX_TOTAL_TOOLS {
            tracing::warn!(origin = %origin, "registry full, declining registration");
            return false;
        }
        let per_origin = catalog.values().filter(|t| t.origin == *origin).count();
        if per_origin >= MAX_TOOLS_PER_ORIGIN {
            tracing::warn!(origin = %origin, "origin at capacity, declining registration");
            return false;
        }
        true
    }

    fn schedule_removal(self: &Arc<Self>, id: ToolId) {
        let registry = Arc::clone(self);
        let key = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(GRACE_PERIOD).await;
            registry.pending_removals.lock().remove(&key);
            let removed = registry.catalog.write().remove(&key).is_some();
            if removed {
                tracing::debug!(id = %key, "grace period elapsed, tool removed");
                registry.notify();
            }
        });
        if let Some(previous) = self.pending_removals.lock().insert(id, handle) {
            previous.abort();
        }
    }

    fn cancel_pending_removal(&self, id: &ToolId) {
        if let Some(handle) = self.pending_removals.lock().remove(id) {
            handle.abort();
        }
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::warn!("change listener panicked");
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
