//! # pagetool-mcp
//!
//! MCP (Model Context Protocol) server that treats a web browser as a
//! tool-exposure layer for AI agents.
//!
//! Browser pages report the interactive capabilities they carry (forms,
//! search inputs, site-declared tool APIs). This crate reconciles those
//! observations into one bounded catalog, serves the catalog to MCP
//! clients over JSON-RPC 2.0, and routes `tools/call` requests back into
//! the originating page with timeout and cleanup semantics.
//!
//! ## Architecture
//!
//! - **[`registry::ToolRegistry`]**: the catalog. Registration, capacity
//!   limits, grace-period cleanup, collision-free protocol naming, change
//!   notification.
//! - **[`server::McpServer`]**: the agent-facing JSON-RPC surface
//!   (`initialize`, `tools/list`, `tools/call`, `ping`) over stdio.
//! - **[`session::SessionCoordinator`]**: feeds tab lifecycle events and
//!   per-page tool batches into the registry; keeps the best-effort
//!   snapshot fresh.
//! - **[`dispatch::ExecutionRouter`]**: correlates outbound execution
//!   requests with inbound page replies.
//!
//! ## Usage with Claude Desktop
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "pagetool": {
//!       "command": "pagetool-mcp",
//!       "args": ["--stdio"]
//!     }
//!   }
//! }
//! ```
//!
//! Tool names are prefixed with a slug of their origin
//! (`example_com__search`), so tools from different sites never collide.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundles;
pub mod dispatch;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod snapshot;

pub use error::{Error, Result};
pub use model::{AuthState, ContextId, DiscoveredTool, Origin, RegisteredTool, SourceTier, ToolId};
pub use registry::ToolRegistry;
pub use server::McpServer;
pub use session::SessionCoordinator;
