//! # Command-Line Interface Module
//!
//! Command-line argument parsing and configuration for the MCP server,
//! using the `clap` derive API. Arguments are grouped into network,
//! transport, task-engine, session, and logging headings; defaults come
//! from `crate::defaults` so the CLI and the library never disagree.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Serve on the default port with builtin tools
//! mcp-serve
//!
//! # Bind a specific interface and port, verbose diagnostics
//! mcp-serve --host 127.0.0.1 --port 9000 -vv
//!
//! # Constrain the task engine for a small target
//! mcp-serve --max-pending-tasks 4 --task-workers 1 --task-timeout-ms 10000
//!
//! # Enable TCP keepalive probing on flaky links
//! mcp-serve --keep-alive --keep-alive-idle-s 30
//! ```

use clap::Parser;

use crate::defaults;

/// MCP Serve - an embedded-class Model Context Protocol server
///
/// Accepts MCP client connections over a length-framed TCP transport,
/// negotiates protocol capabilities, and serves a registry of tools with
/// asynchronous execution, progress streaming, and cancellation.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host address to bind
    ///
    /// Use "127.0.0.1" to accept local clients only or "0.0.0.0" to accept
    /// connections from any interface.
    #[arg(long, default_value = defaults::LISTEN_HOST, help_heading = "Network")]
    pub host: String,

    /// TCP port to listen on
    #[arg(short = 'p', long, default_value_t = defaults::LISTEN_PORT, help_heading = "Network")]
    pub port: u16,

    /// Maximum accepted message size in bytes
    ///
    /// Frames announcing a larger payload are rejected before allocation
    /// and the offending connection is dropped. Bounded by an absolute
    /// 1 MiB ceiling regardless of this setting.
    #[arg(long, default_value_t = defaults::MAX_MESSAGE_SIZE, help_heading = "Transport")]
    pub max_message_size: usize,

    /// Per-receive timeout in milliseconds (0 disables)
    #[arg(long, default_value_t = defaults::RECEIVE_TIMEOUT_MS, help_heading = "Transport")]
    pub receive_timeout_ms: u64,

    /// Per-send timeout in milliseconds (0 disables)
    #[arg(long, default_value_t = defaults::SEND_TIMEOUT_MS, help_heading = "Transport")]
    pub send_timeout_ms: u64,

    /// Socket receive buffer size in bytes
    #[arg(long, default_value_t = defaults::RECEIVE_BUFFER_SIZE, help_heading = "Transport")]
    pub receive_buffer_size: usize,

    /// Enable OS-level TCP keepalive probing
    #[arg(long, help_heading = "Transport")]
    pub keep_alive: bool,

    /// Keepalive idle time before the first probe, in seconds
    #[arg(long, default_value_t = 60, help_heading = "Transport")]
    pub keep_alive_idle_s: u64,

    /// Keepalive probe interval in seconds
    #[arg(long, default_value_t = 10, help_heading = "Transport")]
    pub keep_alive_interval_s: u64,

    /// Unanswered keepalive probes before the link is declared dead
    #[arg(long, default_value_t = 3, help_heading = "Transport")]
    pub keep_alive_count: u32,

    /// Maximum number of pending async tasks per session
    ///
    /// Submissions beyond this bound are refused synchronously with a
    /// resource-limit error.
    #[arg(long, default_value_t = defaults::MAX_PENDING_TASKS, help_heading = "Task Engine")]
    pub max_pending_tasks: usize,

    /// Default per-task deadline in milliseconds (0 disables)
    ///
    /// Individual tools may declare their own expected duration, which
    /// overrides this default for their tasks.
    #[arg(long, default_value_t = defaults::TASK_TIMEOUT_MS, help_heading = "Task Engine")]
    pub task_timeout_ms: u64,

    /// Number of task workers per session
    #[arg(long, default_value_t = defaults::TASK_WORKERS, help_heading = "Task Engine")]
    pub task_workers: usize,

    /// Emit a liveness probe after this many milliseconds of inactivity (0 disables)
    #[arg(long, default_value_t = defaults::HEARTBEAT_INTERVAL_MS, help_heading = "Session")]
    pub heartbeat_interval_ms: u64,

    /// Close sessions after this many milliseconds of total inactivity (0 disables)
    #[arg(long, default_value_t = defaults::SESSION_TIMEOUT_MS, help_heading = "Session")]
    pub session_timeout_ms: u64,

    /// Grace period for draining tasks at shutdown, in milliseconds
    #[arg(long, default_value_t = defaults::SHUTDOWN_GRACE_MS, help_heading = "Session")]
    pub shutdown_grace_ms: u64,

    /// Server name advertised during initialization
    #[arg(long, default_value = defaults::SERVER_NAME, help_heading = "Session")]
    pub server_name: String,

    /// Usage instructions included in the initialize result
    #[arg(long, help_heading = "Session")]
    pub instructions: Option<String>,

    /// Silence all user-facing informational output on stdout
    ///
    /// When this flag is present, only diagnostic logs on stderr or the log
    /// file will be shown. Useful for scripting.
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: debug
    ///  -vv and more: trace
    /// By default, INFO and above are shown.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Write detailed diagnostics to this file, or to "stderr"
    ///
    /// Disabled by default; the operator console on stdout is then the only
    /// output. File logging goes through a non-blocking writer.
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults line up with the crate's constants
    #[test]
    fn defaults_track_crate_constants() {
        let args = Args::parse_from(["mcp-serve"]);
        assert_eq!(args.host, defaults::LISTEN_HOST);
        assert_eq!(args.port, defaults::LISTEN_PORT);
        assert_eq!(args.max_message_size, defaults::MAX_MESSAGE_SIZE);
        assert_eq!(args.max_pending_tasks, defaults::MAX_PENDING_TASKS);
        assert_eq!(args.task_timeout_ms, defaults::TASK_TIMEOUT_MS);
        assert_eq!(args.session_timeout_ms, defaults::SESSION_TIMEOUT_MS);
        assert!(!args.keep_alive);
        assert!(!args.quiet);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn verbosity_accumulates() {
        let args = Args::parse_from(["mcp-serve", "-vv"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn overrides_parse() {
        let args = Args::parse_from([
            "mcp-serve",
            "--host",
            "127.0.0.1",
            "-p",
            "9000",
            "--max-pending-tasks",
            "1",
            "--keep-alive",
        ]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.max_pending_tasks, 1);
        assert!(args.keep_alive);
    }
}
