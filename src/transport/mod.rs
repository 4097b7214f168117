//! # Framed Transport Abstraction Module
//!
//! This module provides the transport layer for the MCP server: delivery and
//! acceptance of complete application messages over a reliable ordered byte
//! stream, using a length-prefixed frame format.
//!
//! ## Key Design Principles
//!
//! - **Unified Interface**: transports implement the same `FrameTransport` trait
//! - **Message Atomicity**: a frame is delivered whole or not at all; partial
//!   reads and writes are resumed inside the operation's deadline
//! - **Bounded Allocation**: frame lengths are validated against a configured
//!   limit before any payload buffer is allocated
//! - **Async-First**: built on Tokio for non-blocking I/O
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────┐
//! │ length: u32 big-endian │ payload: exactly length  │
//! │        (4 bytes)       │          bytes           │
//! └────────────────────────┴──────────────────────────┘
//! ```
//!
//! Zero-length frames are legal and mean "empty message"; the layer above
//! treats them as a no-op.
//!
//! ## Failure Semantics
//!
//! Any I/O error other than a timeout transitions the transport to a
//! disconnected state from which it cannot be revived. An oversized inbound
//! length also discards the connection: once the length header is untrusted
//! the stream cannot be resynchronized.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod tcp;

pub use tcp::{FrameListener, FrameReceiver, FrameSender, TcpFrameTransport};

use crate::defaults;

/// Number of bytes in the frame length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Transport operation failure classification
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operation's deadline elapsed; the connection remains usable
    #[error("transport operation timed out")]
    Timeout,

    /// Frame length exceeded the configured bound; the connection is discarded
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    /// The peer closed the connection, or the transport was closed locally
    #[error("peer closed the connection")]
    PeerClosed,

    /// Underlying I/O failure; the connection is discarded
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection survives this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// OS-level TCP keepalive tuning
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveConfig {
    /// Whether keepalive probes are enabled
    pub enabled: bool,

    /// Idle time before the first probe, in seconds
    pub idle_s: u64,

    /// Interval between probes, in seconds
    pub interval_s: u64,

    /// Number of unanswered probes before the connection is declared dead
    pub count: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_s: 60,
            interval_s: 10,
            count: 3,
        }
    }
}

/// Transport configuration
///
/// All timeouts are expressed in milliseconds; zero disables the deadline
/// for that operation.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-receive deadline in milliseconds (0 disables)
    pub receive_timeout_ms: u64,

    /// Per-send deadline in milliseconds (0 disables)
    pub send_timeout_ms: u64,

    /// Maximum accepted frame payload size in bytes
    pub max_message_size: usize,

    /// Working buffer size hint for the socket receive path
    pub receive_buffer_size: usize,

    /// OS-level keepalive tuning
    pub keep_alive: KeepAliveConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: defaults::RECEIVE_TIMEOUT_MS,
            send_timeout_ms: defaults::SEND_TIMEOUT_MS,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            receive_buffer_size: defaults::RECEIVE_BUFFER_SIZE,
            keep_alive: KeepAliveConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Effective frame size bound: the configured limit clamped to the
    /// absolute ceiling.
    pub fn effective_max_message_size(&self) -> usize {
        self.max_message_size
            .min(defaults::ABSOLUTE_MAX_MESSAGE_SIZE)
    }

    /// Receive deadline as a `Duration`, `None` when disabled
    pub fn receive_timeout(&self) -> Option<Duration> {
        duration_or_disabled(self.receive_timeout_ms)
    }

    /// Send deadline as a `Duration`, `None` when disabled
    pub fn send_timeout(&self) -> Option<Duration> {
        duration_or_disabled(self.send_timeout_ms)
    }
}

fn duration_or_disabled(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Connected and ready for communication
    Connected,

    /// Cleanly closed; all further operations return `PeerClosed`
    Disconnected,

    /// Failed; cannot be revived
    Error,
}

/// Generic framed transport interface
///
/// A transport delivers and accepts complete application messages as byte
/// strings. Implementations must preserve message boundaries and must not
/// interleave partial frames.
///
/// ## Interface Design
///
/// The trait deliberately knows nothing about JSON-RPC: it moves opaque
/// payloads, leaving classification and validation to the codec above it.
/// This keeps the session testable against any byte-stream implementation.
///
/// ## Error Handling
///
/// All fallible operations return [`TransportError`]. Only `Timeout` leaves
/// the connection usable; every other error permanently poisons it, and
/// subsequent operations report `PeerClosed`.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one complete message
    ///
    /// The length prefix and payload are written atomically at the message
    /// level: partial writes are retried until completion, timeout, or
    /// error.
    ///
    /// ## Parameters
    /// - `payload`: message bytes; an empty slice produces a legal
    ///   zero-length frame
    ///
    /// ## Returns
    /// - `Ok(())`: the whole frame was written and flushed
    /// - `Err(TooLarge)`: payload exceeds the configured bound; nothing was
    ///   written
    /// - `Err(Timeout)`: the send deadline elapsed; the connection survives
    /// - `Err(PeerClosed | Io)`: the connection is gone
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Receive one complete message
    ///
    /// Reads exactly four prefix bytes, validates the length against the
    /// configured bound before allocating, then reads exactly that many
    /// payload bytes. Partial reads are resumed up to the deadline.
    ///
    /// ## Returns
    /// - `Ok(bytes)`: one whole frame payload (possibly empty)
    /// - `Err(Timeout)`: no complete frame arrived within the deadline
    /// - `Err(TooLarge)`: the announced length exceeds the bound; the
    ///   connection is discarded because the stream cannot be resynchronized
    /// - `Err(PeerClosed | Io)`: the connection is gone
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Close the transport
    ///
    /// Idempotent. After the first call, both directions report
    /// `PeerClosed`.
    async fn close(&mut self);

    /// Best-effort connectivity probe via the socket error queue
    fn is_connected(&self) -> bool;

    /// Human-readable transport name for logs
    fn name(&self) -> &'static str;

    /// Maximum payload size this transport accepts
    fn max_message_size(&self) -> usize;
}
