//! Typed parameter and result bodies for the recognized protocol methods.
//!
//! Every structure here maps one-to-one onto a wire shape from the protocol's
//! method table. Field names follow the wire's camelCase convention via serde
//! renames; optional fields are omitted from the encoded form when absent so
//! that round-tripped messages stay byte-identical.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestId;

/// Client identity presented during initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version string
    pub version: String,
}

/// Server identity returned from `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Advertised server name
    pub name: String,

    /// Server version string
    pub version: String,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client speaks
    pub protocol_version: String,

    /// Client identity
    pub client_info: ClientInfo,

    /// Client capability announcement, opaque to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

/// Tool-related server capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits `notifications/tools/list_changed`
    pub list_changed: bool,
}

/// Capabilities advertised by the server during initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capabilities; present whenever a registry is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolsCapability { list_changed: true }),
        }
    }
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server will speak
    pub protocol_version: String,

    /// Server identity
    pub server_info: ServerInfo,

    /// Server capability announcement
    pub capabilities: ServerCapabilities,

    /// Optional operator-supplied usage instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Parameters of the `notifications/initialized` notification
///
/// All fields are optional; the notification is frequently sent bare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

/// Parameters of the `tools/list` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsParams {
    /// Pagination cursor from a prior reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    /// Upper bound on the number of tools returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,
}

/// A single tool entry in a `tools/list` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for the tool's arguments, opaque to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Result of the `tools/list` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Registered tools in insertion order
    pub tools: Vec<ToolDescriptor>,

    /// Cursor for the next page, absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of the `tools/call` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to invoke
    pub name: String,

    /// Tool arguments; shape is defined by the tool's input schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    /// Progress token scoping progress notifications to this request
    #[serde(
        rename = "progressToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_token: Option<String>,
}

/// Content item kind in a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Plain text content
    Text,

    /// Base64-encoded image content
    Image,

    /// Reference to an external resource
    Resource,
}

/// A single content item in a `tools/call` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// Content classification
    #[serde(rename = "type")]
    pub kind: ContentKind,

    /// Content body
    pub text: String,

    /// MIME type, where it adds information beyond the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ContentItem {
    /// Build a plain-text content item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: text.into(),
            mime_type: None,
        }
    }
}

/// Progress counters attached to a final tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaProgress {
    /// Units of work completed
    pub progress: u64,

    /// Total units of work
    pub total: u64,
}

/// Result of the `tools/call` request
///
/// Application-level tool failures are carried here with `is_error: true`
/// rather than through the JSON-RPC error channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Result content items
    pub content: Vec<ContentItem>,

    /// Set when the tool itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,

    /// Final progress counters, for tools that reported progress
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaProgress>,
}

impl CallToolResult {
    /// Build a successful single-text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: None,
            meta: None,
        }
    }

    /// Build an application-error result carrying the failure text
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: Some(true),
            meta: None,
        }
    }
}

/// Result of the `ping` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    /// Always `"ok"`
    pub status: String,

    /// Seconds since the Unix epoch at reply time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Parameters of the `notifications/progress` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token scoping this update to its request
    pub progress_token: String,

    /// Units of work completed, monotonically non-decreasing
    pub progress: u64,

    /// Total units of work
    pub total: u64,

    /// Short human-readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Longer detail text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Parameters of the `notifications/cancelled` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// Id of the request being cancelled; accepts either id variant
    pub request_id: RequestId,

    /// Optional human-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Progress token of the cancelled request, if the client tracked one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<String>,

    /// Optional structured error detail from the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Parameters of the `notifications/tools/list_changed` notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsListChangedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Vec<String>>,
}

/// Severity of a `notifications/log` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Parameters of the `notifications/log` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogParams {
    /// Event severity
    pub level: LogLevel,

    /// Log message
    pub message: String,

    /// Originating component, where helpful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
