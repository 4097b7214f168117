//! # Server Module
//!
//! The accept loop and its configuration. The server binds a listening
//! socket, hands each accepted connection to a fresh [`Session`], and fans a
//! shutdown signal out to every running session so the process can close in
//! an orderly fashion.

use anyhow::{anyhow, Result};
use std::net::{IpAddr, SocketAddr};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::defaults;
use crate::registry::ToolRegistry;
use crate::session::{Session, SessionConfig};
use crate::tasks::EngineConfig;
use crate::transport::{FrameListener, KeepAliveConfig, TransportConfig};

/// Complete server configuration
///
/// Derived from CLI arguments via [`ServerConfig::from_args`], which also
/// validates ranges; invalid combinations are refused before any socket is
/// bound.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to bind (0 selects an ephemeral port)
    pub port: u16,

    /// Transport tuning applied to every accepted connection
    pub transport: TransportConfig,

    /// Per-session behavior
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::LISTEN_HOST.to_string(),
            port: defaults::LISTEN_PORT,
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build and validate a configuration from parsed CLI arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        args.host
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("invalid host address: {}", args.host))?;

        if args.max_message_size < 64 {
            return Err(anyhow!(
                "max_message_size must be at least 64 bytes, got {}",
                args.max_message_size
            ));
        }
        if args.max_message_size > defaults::ABSOLUTE_MAX_MESSAGE_SIZE {
            return Err(anyhow!(
                "max_message_size must not exceed {} bytes, got {}",
                defaults::ABSOLUTE_MAX_MESSAGE_SIZE,
                args.max_message_size
            ));
        }
        if args.receive_buffer_size == 0 {
            return Err(anyhow!("receive_buffer_size must be greater than 0"));
        }
        if args.max_pending_tasks == 0 {
            return Err(anyhow!("max_pending_tasks must be greater than 0"));
        }
        if args.task_workers == 0 {
            return Err(anyhow!("task_workers must be greater than 0"));
        }
        if args.server_name.is_empty() {
            return Err(anyhow!("server_name must not be empty"));
        }

        let transport = TransportConfig {
            receive_timeout_ms: args.receive_timeout_ms,
            send_timeout_ms: args.send_timeout_ms,
            max_message_size: args.max_message_size,
            receive_buffer_size: args.receive_buffer_size,
            keep_alive: KeepAliveConfig {
                enabled: args.keep_alive,
                idle_s: args.keep_alive_idle_s,
                interval_s: args.keep_alive_interval_s,
                count: args.keep_alive_count,
            },
        };

        let session = SessionConfig {
            server_name: args.server_name.clone(),
            server_version: crate::VERSION.to_string(),
            instructions: args.instructions.clone(),
            heartbeat_interval: std::time::Duration::from_millis(args.heartbeat_interval_ms),
            session_timeout: std::time::Duration::from_millis(args.session_timeout_ms),
            shutdown_grace: std::time::Duration::from_millis(args.shutdown_grace_ms),
            engine: EngineConfig {
                max_pending_tasks: args.max_pending_tasks,
                default_timeout: std::time::Duration::from_millis(args.task_timeout_ms),
                workers: args.task_workers,
                ..Default::default()
            },
            ..Default::default()
        };

        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            transport,
            session,
        })
    }

    fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| anyhow!("invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// The MCP server: a listener plus the shared tool registry
pub struct McpServer {
    config: ServerConfig,
    registry: ToolRegistry,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl McpServer {
    /// Create a server over an already-populated registry
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            registry,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle for requesting an orderly shutdown from another task
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// The shared tool registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Bind the listening socket without starting the accept loop
    ///
    /// Splitting bind from serve lets callers discover the bound address
    /// when listening on an ephemeral port.
    pub async fn bind_listener(&self) -> Result<FrameListener> {
        let addr = self.config.listen_addr()?;
        FrameListener::bind(addr, self.config.transport.clone())
            .await
            .map_err(|e| anyhow!("failed to bind {}: {}", addr, e))
    }

    /// Accept connections until shutdown is requested
    ///
    /// Each accepted connection runs as its own session; sessions observe
    /// the same shutdown signal and drain their tasks before the loop
    /// returns.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind_listener().await?;
        self.serve_on(listener).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve_on(&self, listener: FrameListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr());

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                accepted = listener.accept(None) => {
                    match accepted {
                        Ok(transport) => {
                            let session = Session::new(
                                self.config.session.clone(),
                                self.registry.clone(),
                            );
                            let session_shutdown = self.shutdown_rx.clone();
                            sessions.push(tokio::spawn(async move {
                                session.run(transport, Some(session_shutdown)).await
                            }));
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested; closing listener");
                        break;
                    }
                }
            }
            // Reap sessions that already finished
            sessions.retain(|handle| !handle.is_finished());
        }

        // Let running sessions observe the signal and drain
        let _ = self.shutdown_tx.send(true);
        for handle in sessions {
            match handle.await {
                Ok(state) => info!("Session ended in state {}", state),
                Err(e) => warn!("Session task failed: {}", e),
            }
        }
        info!("Server stopped");
        Ok(())
    }
}
