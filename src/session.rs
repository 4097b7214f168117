//! # Session State Machine and Dispatch Module
//!
//! A session services one client connection from handshake to shutdown. It
//! owns the transport exclusively, advances a small state machine as
//! messages arrive, and routes work to the async task engine. Three logical
//! roles cooperate per session:
//!
//! - the **receiver** reads frames off the transport and feeds the dispatch
//!   loop
//! - the **writer** is the single owner of the send half, consuming a
//!   bounded outbound channel fed by dispatch and by running tasks
//! - the **task workers** execute `tools/call` work off the receive path
//!
//! ## State Machine
//!
//! ```text
//! Uninitialized → Initializing → Initialized → Active → ShuttingDown → Shutdown
//!        ↘             ↘             ↘           ↘            ↗
//!         ─────────────── Error ──────────────────────────────
//! ```
//!
//! `Active` is reachable only once `notifications/initialized` has been
//! observed, not merely after the `initialize` reply is sent; requests that
//! need `Active` and arrive earlier are answered `-32001`.
//!
//! ## Shutdown
//!
//! Entering `ShuttingDown`, the session stops accepting new requests
//! (answering `-32008`), cancels all pending tasks, awaits their terminal
//! responses under a grace timeout, then closes the transport and reaches
//! `Shutdown`.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::defaults;
use crate::protocol::{
    codec, CallToolParams, CancelledParams, DecodeError, ErrorCode, InitializeParams,
    InitializeResult, InitializedParams, ListToolsParams, ListToolsResult, LogLevel, LogParams,
    Message, Method, PingResult, RequestId, ServerCapabilities, ServerInfo,
    ToolsListChangedParams, PROTOCOL_VERSION,
};
use crate::registry::{ToolListChange, ToolRegistry};
use crate::tasks::{EngineConfig, SubmitError, TaskEngine};
use crate::transport::{TcpFrameTransport, TransportError};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Connection accepted, no handshake yet
    Uninitialized,

    /// `initialize` request is being validated
    Initializing,

    /// `initialize` replied; waiting for `notifications/initialized`
    Initialized,

    /// Serving requests
    Active,

    /// Draining tasks, refusing new requests
    ShuttingDown,

    /// Terminal state; transport released
    Shutdown,

    /// Unrecoverable fault; only Shutdown is reachable from here
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Initialized => "initialized",
            SessionState::Active => "active",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::Shutdown => "shutdown",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Per-session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server name advertised during initialization
    pub server_name: String,

    /// Server version advertised during initialization
    pub server_version: String,

    /// Optional usage instructions included in the initialize result
    pub instructions: Option<String>,

    /// Emit a liveness probe after this much inactivity; zero disables
    pub heartbeat_interval: Duration,

    /// Shut the session down after this much total inactivity; zero disables
    pub session_timeout: Duration,

    /// Grace period for draining tasks at shutdown
    pub shutdown_grace: Duration,

    /// Task engine tuning
    pub engine: EngineConfig,

    /// Outbound channel depth between dispatch/tasks and the writer
    pub outbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_name: defaults::SERVER_NAME.to_string(),
            server_version: crate::VERSION.to_string(),
            instructions: None,
            heartbeat_interval: Duration::from_millis(defaults::HEARTBEAT_INTERVAL_MS),
            session_timeout: Duration::from_millis(defaults::SESSION_TIMEOUT_MS),
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
            engine: EngineConfig::default(),
            outbound_queue: 32,
        }
    }
}

/// Session counters, shared with the writer task
#[derive(Debug, Default)]
pub struct SessionStats {
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub requests: AtomicU64,
    pub notifications: AtomicU64,
    pub protocol_errors: AtomicU64,
    /// Milliseconds since session start at the last successful send
    last_send_ms: AtomicU64,
}

/// Serializable view of the session counters for end-of-session logging
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub uptime_ms: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub requests: u64,
    pub notifications: u64,
    pub protocol_errors: u64,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_cancelled: u64,
    pub tasks_timed_out: u64,
    pub tasks_rejected: u64,
    pub tool_app_errors: u64,
}

/// Frames and faults forwarded from the reader task
enum Inbound {
    Frame(Vec<u8>),
    Fatal(TransportError),
}

/// The stateful object servicing one client connection
pub struct Session {
    config: SessionConfig,
    registry: ToolRegistry,
    state: SessionState,
    stats: Arc<SessionStats>,
    started: Instant,
    last_activity: Instant,
}

impl Session {
    /// Create a session over an accepted connection's registry and config
    pub fn new(config: SessionConfig, registry: ToolRegistry) -> Self {
        let now = Instant::now();
        Self {
            config,
            registry,
            state: SessionState::Uninitialized,
            stats: Arc::new(SessionStats::default()),
            started: now,
            last_activity: now,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Counter snapshot including engine counters
    fn snapshot(&self, engine: &TaskEngine) -> StatsSnapshot {
        let engine_stats = engine.stats();
        StatsSnapshot {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            requests: self.stats.requests.load(Ordering::Relaxed),
            notifications: self.stats.notifications.load(Ordering::Relaxed),
            protocol_errors: self.stats.protocol_errors.load(Ordering::Relaxed),
            tasks_submitted: engine_stats.submitted.load(Ordering::Relaxed),
            tasks_completed: engine_stats.completed.load(Ordering::Relaxed),
            tasks_cancelled: engine_stats.cancelled.load(Ordering::Relaxed),
            tasks_timed_out: engine_stats.timed_out.load(Ordering::Relaxed),
            tasks_rejected: engine_stats.rejected.load(Ordering::Relaxed),
            tool_app_errors: engine_stats.app_errors.load(Ordering::Relaxed),
        }
    }

    /// Service the connection to completion
    ///
    /// Consumes the session and returns its final state (`Shutdown` after an
    /// orderly close, `Error` when the transport failed underneath us). The
    /// optional `shutdown` watch lets the server request an orderly close.
    ///
    /// ## Task Topology
    ///
    /// Three tasks are spawned for the session's lifetime:
    /// - a **reader** forwarding whole frames (per-receive timeouts are
    ///   swallowed there; only fatal transport errors surface)
    /// - a **writer**, the sole owner of the send half, consuming the
    ///   bounded outbound channel
    /// - the **task engine workers**, which share only a clone of the
    ///   outbound sender
    ///
    /// The dispatch loop itself runs here and owns all session state, so no
    /// lock protects the state machine: transitions happen on one task.
    ///
    /// ## Teardown
    ///
    /// Whatever the trigger (peer disconnect, inactivity, server signal),
    /// teardown cancels outstanding tasks, waits for their terminals under
    /// the grace timeout, closes the transport, and logs a final counter
    /// snapshot.
    pub async fn run(
        mut self,
        transport: TcpFrameTransport,
        mut shutdown: Option<watch::Receiver<bool>>,
    ) -> SessionState {
        let peer = transport.peer_addr();
        info!(
            "Session starting for {}",
            peer.map(|p| p.to_string()).unwrap_or_else(|| "<unknown>".into())
        );

        let (mut receiver, mut sender) = match transport.into_split() {
            Ok(halves) => halves,
            Err(e) => {
                error!("Session could not take ownership of the transport: {}", e);
                return SessionState::Error;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(self.config.outbound_queue);

        // Single-writer role: the only task that touches the send half
        let writer_stats = Arc::clone(&self.stats);
        let session_started = self.started;
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let bytes = codec::encode(&message);
                match sender.send(&bytes).await {
                    Ok(()) => {
                        writer_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                        writer_stats.last_send_ms.store(
                            session_started.elapsed().as_millis() as u64,
                            Ordering::Relaxed,
                        );
                    }
                    Err(TransportError::TooLarge { size, limit }) => {
                        warn!(
                            "Outbound message of {} bytes exceeds limit {}; reporting",
                            size, limit
                        );
                        // Replace an oversized response with a protocol error
                        // under the same id; oversized notifications are dropped
                        if let Message::Response { id, .. } = &message {
                            let substitute = Message::response_err(
                                id.clone(),
                                ErrorCode::MessageTooLarge,
                            );
                            if sender.send(&codec::encode(&substitute)).await.is_ok() {
                                writer_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Writer stopping on transport error: {}", e);
                        break;
                    }
                }
            }
            sender.close().await;
        });

        // Receiver role: forwards whole frames, swallows per-receive timeouts
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(8);
        let reader = tokio::spawn(async move {
            loop {
                match receiver.receive().await {
                    Ok(frame) => {
                        if inbound_tx.send(Inbound::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(TransportError::Timeout) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(Inbound::Fatal(e)).await;
                        break;
                    }
                }
            }
        });

        let mut engine = TaskEngine::new(self.config.engine.clone(), outbound_tx.clone());
        let mut changes = self.registry.subscribe();

        let mut tick = tokio::time::interval(Duration::from_millis(250));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_probe = Instant::now();
        let mut fatal = false;

        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => {
                    match inbound {
                        Some(Inbound::Frame(frame)) => {
                            self.last_activity = Instant::now();
                            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            self.handle_frame(&frame, &engine, &outbound_tx).await;
                        }
                        Some(Inbound::Fatal(e)) => {
                            warn!("Transport failed: {}", e);
                            // An untrusted length header cannot be resynchronized;
                            // report the violation on the still-working write half,
                            // then discard the connection
                            if let TransportError::TooLarge { .. } = e {
                                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                                self.send(
                                    &outbound_tx,
                                    Message::response_err(None, ErrorCode::MessageTooLarge),
                                )
                                .await;
                            }
                            fatal = true;
                            break;
                        }
                        None => {
                            fatal = true;
                            break;
                        }
                    }
                }
                change = changes.recv() => {
                    self.handle_registry_change(change, &outbound_tx).await;
                }
                requested = async {
                    match shutdown.as_mut() {
                        Some(rx) => rx.changed().await.is_ok() && *rx.borrow(),
                        None => std::future::pending().await,
                    }
                } => {
                    if requested {
                        info!("Server requested session shutdown");
                        break;
                    }
                }
                _ = tick.tick() => {
                    engine.sweep_expired().await;
                    if self.inactivity_expired() {
                        info!("Session inactive past its timeout; shutting down");
                        break;
                    }
                    self.maybe_probe(&mut last_probe, &outbound_tx).await;
                }
            }
        }

        let final_state = if fatal {
            self.state = SessionState::Error;
            // Peer is gone; drain quickly without waiting for terminals to flush
            engine.cancel_all();
            engine.shutdown(Duration::from_millis(250)).await;
            SessionState::Error
        } else {
            self.state = SessionState::ShuttingDown;
            info!("Session shutting down");
            self.drain(&mut engine, &mut inbound_rx, &outbound_tx).await;
            engine.shutdown(Duration::from_millis(100)).await;
            self.state = SessionState::Shutdown;
            SessionState::Shutdown
        };

        let snapshot = self.snapshot(&engine);
        match serde_json::to_string(&snapshot) {
            Ok(rendered) => info!("Session finished ({}): {}", final_state, rendered),
            Err(_) => info!("Session finished ({})", final_state),
        }

        // Release the outbound path: engine workers are stopped, our clone
        // drops here, and the writer exits once the channel drains
        drop(engine);
        drop(outbound_tx);
        if let Err(e) = writer.await {
            debug!("Writer task ended abnormally: {}", e);
        }
        reader.abort();

        final_state
    }

    /// Time since the last message moved in either direction
    fn idle(&self) -> Duration {
        let receive_idle = self.last_activity.elapsed();
        let last_send_ms = self.stats.last_send_ms.load(Ordering::Relaxed);
        if last_send_ms == 0 {
            return receive_idle;
        }
        let send_idle = self
            .started
            .elapsed()
            .saturating_sub(Duration::from_millis(last_send_ms));
        receive_idle.min(send_idle)
    }

    /// Whether total inactivity exceeded the session timeout
    ///
    /// Only receive-side silence counts here: our own keepalive probes are
    /// sends and must not keep an abandoned session alive.
    fn inactivity_expired(&self) -> bool {
        !self.config.session_timeout.is_zero()
            && self.last_activity.elapsed() >= self.config.session_timeout
    }

    /// Emit a liveness probe when the link has been quiet for a while
    async fn maybe_probe(&self, last_probe: &mut Instant, tx: &mpsc::Sender<Message>) {
        if self.config.heartbeat_interval.is_zero() || self.state != SessionState::Active {
            return;
        }
        let idle = self.idle();
        if idle >= self.config.heartbeat_interval
            && last_probe.elapsed() >= self.config.heartbeat_interval
        {
            *last_probe = Instant::now();
            debug!("Emitting keepalive probe after {:?} idle", idle);
            let params = LogParams {
                level: LogLevel::Info,
                message: "keepalive".to_string(),
                context: Some("session".to_string()),
                data: None,
            };
            let probe = Message::notification(Method::Log, serde_json::to_value(&params).ok());
            let _ = tx.send(probe).await;
        }
    }

    /// Forward a registry mutation to the client as `tools/list_changed`
    async fn handle_registry_change(
        &self,
        change: Result<ToolListChange, tokio::sync::broadcast::error::RecvError>,
        tx: &mpsc::Sender<Message>,
    ) {
        use tokio::sync::broadcast::error::RecvError;
        let params = match change {
            Ok(ToolListChange::Added(name)) => ToolsListChangedParams {
                added: Some(vec![name]),
                ..Default::default()
            },
            Ok(ToolListChange::Removed(name)) => ToolsListChangedParams {
                removed: Some(vec![name]),
                ..Default::default()
            },
            Ok(ToolListChange::Modified(name)) => ToolsListChangedParams {
                modified: Some(vec![name]),
                ..Default::default()
            },
            // Missed some events: announce that the list changed without detail
            Err(RecvError::Lagged(_)) => ToolsListChangedParams::default(),
            Err(RecvError::Closed) => return,
        };
        if self.state != SessionState::Active {
            return;
        }
        let notification = Message::notification(
            Method::ToolsListChanged,
            serde_json::to_value(&params).ok(),
        );
        let _ = tx.send(notification).await;
    }

    /// Decode one frame and dispatch it
    async fn handle_frame(
        &mut self,
        frame: &[u8],
        engine: &TaskEngine,
        tx: &mpsc::Sender<Message>,
    ) {
        // Zero-length frames are legal no-ops
        if frame.is_empty() {
            debug!("Ignoring empty frame");
            return;
        }

        match codec::decode(frame) {
            Ok(Message::Request { id, method, params }) => {
                self.stats.requests.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = self.handle_request(id, &method, params, engine).await {
                    self.send(tx, reply).await;
                }
            }
            Ok(Message::Notification { method, params }) => {
                self.stats.notifications.fetch_add(1, Ordering::Relaxed);
                self.handle_notification(&method, params, engine);
            }
            Ok(Message::Response { id, .. }) => {
                // The server never issues requests over this link
                debug!(
                    "Ignoring unsolicited response for id {:?}",
                    id.map(|i| i.to_string())
                );
            }
            Err(DecodeError::Json(e)) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Parse error: {}", e);
                self.send(tx, Message::parse_error()).await;
            }
            Err(DecodeError::Invalid(why)) => {
                self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Invalid request: {}", why);
                self.send(
                    tx,
                    Message::response_err_msg(None, ErrorCode::InvalidRequest, why),
                )
                .await;
            }
        }
    }

    /// Dispatch a request; `None` means the reply arrives later from a task
    ///
    /// Every request produces exactly one response under its id unless the
    /// session terminates first: either the synchronous reply returned here,
    /// or (for `tools/call` submissions) the terminal the engine emits.
    async fn handle_request(
        &mut self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        engine: &TaskEngine,
    ) -> Option<Message> {
        let method = match Method::from_name(method) {
            Some(m) if !m.is_notification() => m,
            _ => {
                debug!("Method not found for request: {}", method);
                return Some(Message::response_err(Some(id), ErrorCode::MethodNotFound));
            }
        };

        match method {
            Method::Initialize => Some(self.on_initialize(id, params)),
            Method::Ping => Some(self.gate_active(&id).unwrap_or_else(|| {
                let result = PingResult {
                    status: "ok".to_string(),
                    timestamp: Some(chrono::Utc::now().timestamp()),
                };
                match serde_json::to_value(&result) {
                    Ok(value) => Message::response_ok(id, value),
                    Err(_) => Message::response_err(Some(id), ErrorCode::InternalError),
                }
            })),
            Method::ListTools => Some(
                self.gate_active(&id)
                    .unwrap_or_else(|| self.on_list_tools(id, params)),
            ),
            Method::CallTool => match self.gate_active(&id) {
                Some(refusal) => Some(refusal),
                None => self.on_call_tool(id, params, engine),
            },
            // from_name + is_notification filtering leaves only requests here
            _ => Some(Message::response_err(Some(id), ErrorCode::MethodNotFound)),
        }
    }

    /// Gate a request on the Active state
    ///
    /// Returns the refusal to send, or `None` when the request may proceed.
    fn gate_active(&self, id: &RequestId) -> Option<Message> {
        match self.state {
            SessionState::Active => None,
            SessionState::Uninitialized
            | SessionState::Initializing
            | SessionState::Initialized => Some(Message::response_err(
                Some(id.clone()),
                ErrorCode::NotInitialized,
            )),
            SessionState::ShuttingDown | SessionState::Shutdown | SessionState::Error => {
                Some(Message::response_err(
                    Some(id.clone()),
                    ErrorCode::InvalidState,
                ))
            }
        }
    }

    fn on_initialize(&mut self, id: RequestId, params: Option<Value>) -> Message {
        if self.state != SessionState::Uninitialized {
            warn!("initialize received in state {}", self.state);
            return Message::response_err_msg(
                Some(id),
                ErrorCode::InvalidState,
                "Session already initialized",
            );
        }

        // Validate before transitioning so a malformed handshake can be retried
        let params = match params {
            Some(params) => params,
            None => {
                return Message::response_err_msg(
                    Some(id),
                    ErrorCode::InvalidParams,
                    "initialize requires params",
                )
            }
        };
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Malformed initialize params: {}", e);
                return Message::response_err_msg(
                    Some(id),
                    ErrorCode::InvalidParams,
                    format!("Malformed initialize params: {}", e),
                );
            }
        };

        self.state = SessionState::Initializing;
        info!(
            "Initializing session for client {} {} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );
        if params.protocol_version != PROTOCOL_VERSION {
            // Version negotiation: reply with the revision we actually speak
            warn!(
                "Client requested protocol {}, serving {}",
                params.protocol_version, PROTOCOL_VERSION
            );
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
            capabilities: ServerCapabilities::default(),
            instructions: self.config.instructions.clone(),
        };
        self.state = SessionState::Initialized;
        match serde_json::to_value(&result) {
            Ok(value) => Message::response_ok(id, value),
            Err(e) => {
                error!("Failed to serialize initialize result: {}", e);
                self.state = SessionState::Error;
                Message::response_err(Some(id), ErrorCode::InternalError)
            }
        }
    }

    fn on_list_tools(&self, id: RequestId, params: Option<Value>) -> Message {
        let params: ListToolsParams = match params {
            None => ListToolsParams::default(),
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Message::response_err_msg(
                        Some(id),
                        ErrorCode::InvalidParams,
                        format!("Malformed tools/list params: {}", e),
                    )
                }
            },
        };

        // Cursors are decimal offsets into the insertion-ordered snapshot
        let start = match params.cursor.as_deref() {
            None => 0,
            Some(cursor) => match cursor.parse::<usize>() {
                Ok(start) => start,
                Err(_) => {
                    return Message::response_err_msg(
                        Some(id),
                        ErrorCode::InvalidParams,
                        "Malformed cursor",
                    )
                }
            },
        };

        let snapshot = self.registry.list();
        let total = snapshot.len();
        let mut tools: Vec<_> = snapshot.into_iter().skip(start).collect();
        if let Some(max) = params.max_results {
            tools.truncate(max as usize);
        }
        let served = start + tools.len();
        let result = ListToolsResult {
            next_cursor: if served < total {
                Some(served.to_string())
            } else {
                None
            },
            tools,
        };
        match serde_json::to_value(&result) {
            Ok(value) => Message::response_ok(id, value),
            Err(_) => Message::response_err(Some(id), ErrorCode::InternalError),
        }
    }

    fn on_call_tool(
        &self,
        id: RequestId,
        params: Option<Value>,
        engine: &TaskEngine,
    ) -> Option<Message> {
        // Progress tokens may ride in `_meta` alongside the typed fields
        let meta_token = params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("progressToken"))
            .and_then(Value::as_str)
            .map(String::from);

        let params: CallToolParams = match params {
            None => {
                return Some(Message::response_err_msg(
                    Some(id),
                    ErrorCode::InvalidParams,
                    "tools/call requires params",
                ))
            }
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Some(Message::response_err_msg(
                        Some(id),
                        ErrorCode::InvalidParams,
                        format!("Malformed tools/call params: {}", e),
                    ))
                }
            },
        };

        let tool = match self.registry.lookup(&params.name) {
            Some(tool) => tool,
            None => {
                debug!("Unknown tool requested: {}", params.name);
                return Some(Message::response_err_msg(
                    Some(id),
                    ErrorCode::MethodNotFound,
                    format!("Unknown tool: {}", params.name),
                ));
            }
        };

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let token = params.progress_token.or(meta_token);
        match engine.submit(id.clone(), tool, arguments, token) {
            Ok(()) => None,
            Err(SubmitError::Limit) => Some(Message::response_err(
                Some(id),
                ErrorCode::ResourceLimit,
            )),
            Err(SubmitError::Duplicate) => Some(Message::response_err_msg(
                Some(id),
                ErrorCode::InvalidRequest,
                "A request with this id is already in flight",
            )),
        }
    }

    /// Route a notification; notifications never get replies
    fn handle_notification(&mut self, method: &str, params: Option<Value>, engine: &TaskEngine) {
        match Method::from_name(method) {
            Some(Method::Initialized) => {
                if self.state == SessionState::Initialized {
                    // The notification may carry optional client details
                    if let Some(details) = params
                        .and_then(|p| serde_json::from_value::<InitializedParams>(p).ok())
                    {
                        if let Some(session_id) = details.session_id {
                            debug!("Client supplied session id {}", session_id);
                        }
                    }
                    info!("Handshake complete; session active");
                    self.state = SessionState::Active;
                } else {
                    warn!(
                        "Dropping notifications/initialized in state {} ({})",
                        self.state,
                        ErrorCode::InvalidNotification
                    );
                }
            }
            Some(Method::Cancelled) => {
                if self.state != SessionState::Active {
                    warn!(
                        "Dropping notifications/cancelled in state {} ({})",
                        self.state,
                        ErrorCode::InvalidNotification
                    );
                    return;
                }
                let params: CancelledParams = match params.map(serde_json::from_value) {
                    Some(Ok(parsed)) => parsed,
                    Some(Err(e)) => {
                        warn!("Malformed cancellation: {}", e);
                        return;
                    }
                    None => {
                        warn!("Cancellation without params");
                        return;
                    }
                };
                if engine.cancel(&params.request_id) {
                    debug!(
                        "Cancelled request {} ({})",
                        params.request_id,
                        params.reason.as_deref().unwrap_or("no reason given")
                    );
                } else {
                    debug!(
                        "Cancellation for unknown or finished request {}",
                        params.request_id
                    );
                }
            }
            Some(m) if m.is_notification() => {
                // Recognized but not client-to-server; drop with a log line
                debug!("Ignoring notification {}", m);
            }
            Some(m) => {
                warn!("Request method {} sent as notification; dropping", m);
            }
            None => {
                // Forward compatibility: silent drop, but logged
                debug!("Ignoring unknown notification {}", method);
            }
        }
    }

    /// Answer inbound requests with `-32008` while pending tasks drain
    async fn drain(
        &mut self,
        engine: &mut TaskEngine,
        inbound_rx: &mut mpsc::Receiver<Inbound>,
        tx: &mpsc::Sender<Message>,
    ) {
        engine.cancel_all();
        let deadline = Instant::now() + self.config.shutdown_grace;
        while engine.pending_count() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown grace expired with {} tasks outstanding",
                    engine.pending_count()
                );
                break;
            }
            tokio::select! {
                inbound = inbound_rx.recv() => {
                    match inbound {
                        Some(Inbound::Frame(frame)) => {
                            if let Ok(Message::Request { id, .. }) = codec::decode(&frame) {
                                self.send(
                                    tx,
                                    Message::response_err(Some(id), ErrorCode::InvalidState),
                                )
                                .await;
                            }
                        }
                        Some(Inbound::Fatal(_)) | None => break,
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }

    async fn send(&self, tx: &mpsc::Sender<Message>, message: Message) {
        if tx.send(message).await.is_err() {
            debug!("Outbound channel closed; dropping message");
        }
    }
}
