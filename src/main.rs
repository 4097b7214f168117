//! # MCP Serve - Main Entry Point
//!
//! The binary wires four things together and then waits: parsed CLI
//! arguments, the tracing subscriber (see `logging`), a tool registry
//! populated with the builtin examples, and the accept loop. Unlike a
//! one-shot tool, nothing here "finishes" on its own — the process runs
//! until an interrupt arrives, at which point every live session drains
//! its tasks before the listener lets `main` return.

use anyhow::Result;
use clap::Parser;
use mcp_serve::{
    cli::Args,
    registry::ToolRegistry,
    server::{McpServer, ServerConfig},
    tools,
};
use tracing::{info, warn};

mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging comes up first so everything after it reports through
    // tracing. The guard flushes buffered file output when main returns.
    let _log_guard = logging::init(&args);

    info!("Starting MCP server {}", mcp_serve::VERSION);
    let config = ServerConfig::from_args(&args)?;

    let registry = ToolRegistry::new();
    tools::register_builtins(&registry)?;
    info!("Registered {} tools", registry.len());

    let server = McpServer::new(config, registry);

    // Ctrl-c requests an orderly shutdown: the listener closes and every
    // session drains its tasks before the process exits.
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; shutting down");
            let _ = shutdown.send(true);
        }
    });

    server.serve().await?;
    info!("Goodbye");
    Ok(())
}
