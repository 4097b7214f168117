//! # MCP Serve
//!
//! An embedded-class Model Context Protocol (MCP) server implemented in Rust.
//! This library provides a strict JSON-RPC 2.0 message model, a session state
//! machine, a cooperative async task engine with progress and cancellation,
//! and a length-framed TCP transport.

pub mod cli;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod tasks;
pub mod tools;
pub mod transport;

pub use cli::Args;
pub use protocol::{ErrorCode, Message, Method, RequestId};
pub use registry::{Tool, ToolRegistry};
pub use server::{McpServer, ServerConfig};
pub use session::{Session, SessionState};
pub use tasks::{TaskEngine, TaskState};
pub use transport::{FrameTransport, TcpFrameTransport, TransportConfig, TransportError};

/// The current version of the MCP server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default TCP listen port
    pub const LISTEN_PORT: u16 = 8080;

    /// Default host address to bind
    pub const LISTEN_HOST: &str = "0.0.0.0";

    /// Default maximum message size in bytes
    pub const MAX_MESSAGE_SIZE: usize = 8192;

    /// Absolute ceiling on frame length, regardless of configuration
    pub const ABSOLUTE_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    /// Default per-receive timeout in milliseconds
    pub const RECEIVE_TIMEOUT_MS: u64 = 5000;

    /// Default per-send timeout in milliseconds
    pub const SEND_TIMEOUT_MS: u64 = 5000;

    /// Default working buffer size for receives
    pub const RECEIVE_BUFFER_SIZE: usize = 4096;

    /// Default maximum number of pending async tasks per session
    pub const MAX_PENDING_TASKS: usize = 8;

    /// Default per-task deadline in milliseconds
    pub const TASK_TIMEOUT_MS: u64 = 30_000;

    /// Default number of task workers per session
    pub const TASK_WORKERS: usize = 2;

    /// Default heartbeat probe interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;

    /// Default session inactivity timeout in milliseconds
    pub const SESSION_TIMEOUT_MS: u64 = 300_000;

    /// Default grace period for draining tasks at shutdown, in milliseconds
    pub const SHUTDOWN_GRACE_MS: u64 = 5000;

    /// Default server name advertised during initialization
    pub const SERVER_NAME: &str = "mcp-serve";
}
