//! # JSON-RPC Message Model and Protocol Module
//!
//! This module defines the typed message model for the MCP server's JSON-RPC 2.0
//! wire protocol, along with the protocol constants, the error-code taxonomy, and
//! builders for well-formed responses and notifications.
//!
//! ## Key Design Principles
//!
//! - **Tagged sums over inheritance**: `Message` and `RequestId` are enums and
//!   all dispatch is by pattern match
//! - **Strict validation**: classification of incoming JSON happens in one place
//!   (the codec) with a closed set of outcomes
//! - **Verbatim id echo**: a response carries the exact id variant of its request
//! - **Closed method family**: recognized methods are enumerated; unknown methods
//!   remain representable so the session can answer `-32601` or drop them
//!
//! ## Message Protocol
//!
//! Every message is a JSON object with `jsonrpc: "2.0"` and is classified by
//! field presence:
//! - `method` + `id` present: Request
//! - `method` present, `id` absent: Notification
//! - `id` present, `method` absent, exactly one of `result`/`error`: Response
//!
//! Any other combination is an Invalid Request (`-32600`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod codec;
pub mod types;

pub use codec::{decode, encode, DecodeError};
pub use types::{
    CallToolParams, CallToolResult, CancelledParams, ClientInfo, ContentItem, ContentKind,
    InitializeParams, InitializeResult, InitializedParams, ListToolsParams, ListToolsResult,
    LogLevel, LogParams, MetaProgress, PingResult, ProgressParams, ServerCapabilities,
    ServerInfo, ToolDescriptor, ToolsCapability, ToolsListChangedParams,
};

/// JSON-RPC protocol version string, required on every message
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this server negotiates
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Maximum accepted method name length in bytes
pub const MAX_METHOD_LEN: usize = 64;

/// Maximum accepted tool name length in bytes
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// A JSON-RPC request identifier
///
/// Ids are either text strings or signed integers and are compared
/// structurally: two ids are equal iff they are the same variant with the
/// same contents. Responses echo the id of their request verbatim, and the
/// variant survives a round trip (a numeric id is re-encoded as a JSON
/// number, a string id as a JSON string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String-typed id, chosen freely by the client (may be empty)
    Str(String),

    /// Integer-typed id; fractional JSON numbers are rejected by the codec
    Num(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Str(s) => write!(f, "\"{}\"", s),
            RequestId::Num(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Str(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Num(n)
    }
}

/// The closed family of recognized protocol methods
///
/// Unknown method names are still representable at the `Message` level (as
/// raw strings); this enum is the dispatch vocabulary. Requests for methods
/// outside this set are answered `-32601`, unknown notifications are logged
/// and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `initialize` request: capability and version negotiation
    Initialize,

    /// `tools/list` request: enumerate the tool registry
    ListTools,

    /// `tools/call` request: invoke a tool, possibly as an async task
    CallTool,

    /// `ping` request: liveness probe with a timestamped reply
    Ping,

    /// `notifications/initialized`: client completes the handshake
    Initialized,

    /// `notifications/progress`: server-side progress stream
    Progress,

    /// `notifications/cancelled`: client cancels an in-flight request
    Cancelled,

    /// `notifications/tools/list_changed`: registry mutation announcement
    ToolsListChanged,

    /// `notifications/log`: structured log event forwarded to the client
    Log,
}

impl Method {
    /// Resolve a wire method name to a recognized method, if any
    pub fn from_name(name: &str) -> Option<Method> {
        match name {
            "initialize" => Some(Method::Initialize),
            "tools/list" => Some(Method::ListTools),
            "tools/call" => Some(Method::CallTool),
            "ping" => Some(Method::Ping),
            "notifications/initialized" => Some(Method::Initialized),
            "notifications/progress" => Some(Method::Progress),
            "notifications/cancelled" => Some(Method::Cancelled),
            "notifications/tools/list_changed" => Some(Method::ToolsListChanged),
            "notifications/log" => Some(Method::Log),
            _ => None,
        }
    }

    /// The wire name of this method
    pub fn name(&self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::ListTools => "tools/list",
            Method::CallTool => "tools/call",
            Method::Ping => "ping",
            Method::Initialized => "notifications/initialized",
            Method::Progress => "notifications/progress",
            Method::Cancelled => "notifications/cancelled",
            Method::ToolsListChanged => "notifications/tools/list_changed",
            Method::Log => "notifications/log",
        }
    }

    /// Whether this method names a notification rather than a request
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Method::Initialized
                | Method::Progress
                | Method::Cancelled
                | Method::ToolsListChanged
                | Method::Log
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normative protocol error codes
///
/// The numeric values are fixed by the wire protocol; the associated
/// messages are human-readable defaults that may be overridden per response.
/// Application-level tool failures do not use this channel at all (they are
/// reported as successful responses carrying `isError: true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Payload was not valid JSON; the reply carries a null id
    ParseError,

    /// JSON was valid but not a conforming message
    InvalidRequest,

    /// Unknown or unsupported method for a request
    MethodNotFound,

    /// Params present but malformed for the method
    InvalidParams,

    /// Unexpected server fault
    InternalError,

    /// Request requiring the Active state arrived before the handshake completed
    NotInitialized,

    /// Notification in the wrong state or malformed (never answered on the wire)
    InvalidNotification,

    /// Task cancelled by client notification or shutdown
    Cancelled,

    /// Task deadline exceeded
    Timeout,

    /// Session not in a state that accepts the request
    InvalidState,

    /// Too many pending tasks
    ResourceLimit,

    /// Message exceeds the configured size bound
    MessageTooLarge,

    /// Target (for example a named resource) missing
    NotFound,
}

impl ErrorCode {
    /// The numeric wire code
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::NotInitialized => -32001,
            ErrorCode::InvalidNotification => -32002,
            ErrorCode::Cancelled => -32004,
            ErrorCode::Timeout => -32005,
            ErrorCode::InvalidState => -32008,
            ErrorCode::ResourceLimit => -32011,
            ErrorCode::MessageTooLarge => -32012,
            ErrorCode::NotFound => -32017,
        }
    }

    /// Default human-readable message for this code
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::NotInitialized => "Not initialized",
            ErrorCode::InvalidNotification => "Invalid notification",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::InvalidState => "Invalid state",
            ErrorCode::ResourceLimit => "Resource limit",
            ErrorCode::MessageTooLarge => "Message too large",
            ErrorCode::NotFound => "Not found",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// A JSON-RPC error object carried in an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (see [`ErrorCode`])
    pub code: i32,

    /// Short human-readable description
    pub message: String,

    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error object from a taxonomy code with its default message
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    /// Build an error object with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail to this error
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Body of a response: exactly one of a result value or an error object
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Successful result payload
    Result(Value),

    /// Error payload
    Error(RpcError),
}

/// A single JSON-RPC message
///
/// The three categories mirror the wire protocol exactly. A `Request`
/// carries an id and a method; a `Response` carries an id (null only for
/// parse-error responses we emit ourselves) and exactly one of
/// result/error; a `Notification` carries a method and no id.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client asks; the server must reply exactly once
    Request {
        /// Client-chosen correlation id, echoed in the response
        id: RequestId,
        /// Wire method name (may be outside the recognized set)
        method: String,
        /// Method parameters, if any
        params: Option<Value>,
    },

    /// Reply to a prior request
    Response {
        /// Echoed request id; `None` encodes as JSON null (parse errors only)
        id: Option<RequestId>,
        /// Exactly one of result or error
        body: ResponseBody,
    },

    /// Fire-and-forget in either direction
    Notification {
        /// Wire method name
        method: String,
        /// Notification parameters, if any
        params: Option<Value>,
    },
}

impl Message {
    /// Build a request message
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a successful response echoing the given id
    pub fn response_ok(id: RequestId, result: Value) -> Self {
        Message::Response {
            id: Some(id),
            body: ResponseBody::Result(result),
        }
    }

    /// Build an error response from a taxonomy code with its default message
    pub fn response_err(id: Option<RequestId>, code: ErrorCode) -> Self {
        Message::Response {
            id,
            body: ResponseBody::Error(RpcError::from_code(code)),
        }
    }

    /// Build an error response with a custom message
    pub fn response_err_msg(
        id: Option<RequestId>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Message::Response {
            id,
            body: ResponseBody::Error(RpcError::with_message(code, message)),
        }
    }

    /// Build an id-less parse-error response
    pub fn parse_error() -> Self {
        Message::response_err(None, ErrorCode::ParseError)
    }

    /// Build a notification message
    pub fn notification(method: Method, params: Option<Value>) -> Self {
        Message::Notification {
            method: method.name().to_string(),
            params,
        }
    }

    /// The id carried by this message, if any
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request { id, .. } => Some(id),
            Message::Response { id, .. } => id.as_ref(),
            Message::Notification { .. } => None,
        }
    }

    /// The method carried by this message, if any
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => {
                Some(method.as_str())
            }
            Message::Response { .. } => None,
        }
    }
}
