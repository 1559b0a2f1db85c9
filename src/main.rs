//! pagetool-mcp - MCP server exposing browser page tools to AI agents.
//!
//! This binary serves the MCP protocol on stdio while the browser side
//! feeds tool observations in through the session coordinator.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pagetool_mcp::bundles;
use pagetool_mcp::dispatch::ExecutionRouter;
use pagetool_mcp::registry::ToolRegistry;
use pagetool_mcp::server::McpServer;
use pagetool_mcp::session::{ChangeNotifier, SessionCoordinator};
#[cfg(not(feature = "http"))]
use pagetool_mcp::session::LogNotifier;
use pagetool_mcp::snapshot::JsonSnapshotStore;

/// MCP server exposing browser-discovered page tools.
#[derive(Parser, Debug)]
#[command(name = "pagetool-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in stdio mode (standard MCP transport).
    #[arg(long, default_value = "true")]
    stdio: bool,

    /// Path of the best-effort catalog snapshot.
    #[arg(long, default_value = "pagetool-snapshot.json")]
    snapshot: std::path::PathBuf,

    /// Listen address for the browser-extension ingest API.
    #[cfg(feature = "http")]
    #[arg(long, default_value = "127.0.0.1:8917")]
    http_addr: std::net::SocketAddr,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Log to stderr (not stdout, which is used for MCP protocol)
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        "Starting {} v{}",
        pagetool_mcp::server::SERVER_NAME,
        pagetool_mcp::server::SERVER_VERSION
    );

    let registry = Arc::new(ToolRegistry::new());
    bundles::register_builtin(&registry);

    let router = Arc::new(ExecutionRouter::new());
    let store = Arc::new(JsonSnapshotStore::new(args.snapshot.clone()));

    let notifier: Arc<dyn ChangeNotifier>;
    #[cfg(feature = "http")]
    let changes;
    #[cfg(feature = "http")]
    {
        let (watch_notifier, watch_rx) = pagetool_mcp::http::WatchNotifier::channel();
        notifier = watch_notifier;
        changes = watch_rx;
    }
    #[cfg(not(feature = "http"))]
    {
        notifier = Arc::new(LogNotifier);
    }

    let coordinator = SessionCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&router),
        Some(store),
        notifier,
    );
    coordinator.start().await;

    #[cfg(feature = "http")]
    {
        let ingest = pagetool_mcp::http::ingest_router(
            Arc::clone(&coordinator),
            Arc::clone(&router),
            changes,
        );
        let addr = args.http_addr;
        tokio::spawn(async move {
            if let Err(e) = pagetool_mcp::http::serve(addr, ingest).await {
                tracing::error!("ingest server error: {}", e);
            }
        });
    }

    let server = McpServer::new(Arc::clone(&registry), Arc::clone(&router));

    if args.stdio {
        match server.run_stdio().await {
            Ok(()) => {
                tracing::info!("Server exited cleanly");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Server error: {}", e);
                ExitCode::FAILURE
            }
        }
    } else {
        tracing::error!("Only stdio mode is currently supported");
        ExitCode::FAILURE
    }
}
