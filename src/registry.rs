//! # Tool Registry Module
//!
//! A process-wide mapping from tool name to tool definition: description,
//! input schema, handler, and an optional duration hint that doubles as the
//! task deadline override. Registration is idempotent by name (a later
//! registration overwrites and is logged), lookup is O(1), and listing is
//! deterministic in insertion order.
//!
//! The registry is read-mostly. Mutation during an active session is allowed
//! and atomic with respect to concurrent `tools/list` snapshots; every
//! mutation is broadcast so sessions can forward a
//! `notifications/tools/list_changed` to their clients.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::protocol::{CallToolResult, ToolDescriptor, MAX_TOOL_NAME_LEN};
use crate::tasks::TaskContext;

/// Outcome of a tool invocation: a structured result, or an application
/// error string that is surfaced to the client as `isError: true` content
/// rather than a protocol error.
pub type ToolOutcome = Result<CallToolResult, String>;

/// Synchronous tool handler
///
/// Must be non-blocking: bounded CPU, no I/O waits beyond a few
/// milliseconds. Runs to completion on a task worker.
pub type SyncHandler = dyn Fn(Value) -> ToolOutcome + Send + Sync;

/// Future produced by an asynchronous tool handler
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// Asynchronous tool factory
///
/// Receives a [`TaskContext`] granting progress reporting, cancellation
/// checks, and cooperative yields; the produced future owns its own
/// progress/cancel behavior.
pub type AsyncHandler = dyn Fn(TaskContext, Value) -> ToolFuture + Send + Sync;

/// How a tool executes when called
#[derive(Clone)]
pub enum ToolHandler {
    /// Runs to completion on a worker without yielding
    Sync(Arc<SyncHandler>),

    /// Yields cooperatively and may stream progress
    Async(Arc<AsyncHandler>),
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandler::Sync(_) => f.write_str("ToolHandler::Sync"),
            ToolHandler::Async(_) => f.write_str("ToolHandler::Async"),
        }
    }
}

/// A registered tool
#[derive(Debug, Clone)]
pub struct Tool {
    /// Unique name, at most 64 bytes of `[A-Za-z0-9_.-]`
    pub name: String,

    /// Human-readable description served in `tools/list`
    pub description: String,

    /// JSON Schema for the tool's arguments; opaque to the server
    pub input_schema: Value,

    /// Execution strategy
    pub handler: ToolHandler,

    /// Expected duration; overrides the engine's default task deadline
    pub estimated_duration: Option<Duration>,
}

impl Tool {
    /// Define a synchronous tool
    pub fn sync<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> ToolOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: ToolHandler::Sync(Arc::new(handler)),
            estimated_duration: None,
        }
    }

    /// Define an asynchronous tool
    pub fn async_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(TaskContext, Value) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: ToolHandler::Async(Arc::new(handler)),
            estimated_duration: None,
        }
    }

    /// Set the expected duration (and task deadline override)
    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }

    /// Whether this tool declares itself asynchronous
    pub fn is_async(&self) -> bool {
        matches!(self.handler, ToolHandler::Async(_))
    }

    /// Wire-facing descriptor for `tools/list`
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: if self.input_schema.is_null() {
                None
            } else {
                Some(self.input_schema.clone())
            },
        }
    }
}

/// Registration failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool name violates the length or character-set rules
    #[error("invalid tool name: {0}")]
    InvalidName(String),
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One registry mutation, broadcast to interested sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolListChange {
    /// A new name appeared
    Added(String),

    /// A name was removed
    Removed(String),

    /// An existing name was overwritten
    Modified(String),
}

impl ToolListChange {
    /// Tool name this change concerns
    pub fn name(&self) -> &str {
        match self {
            ToolListChange::Added(n)
            | ToolListChange::Removed(n)
            | ToolListChange::Modified(n) => n,
        }
    }
}

struct RegistryInner {
    order: Vec<Arc<Tool>>,
    index: HashMap<String, usize>,
}

/// Process-wide tool registry
///
/// Cheaply cloneable handle; all clones share the same underlying state.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    changes: broadcast::Sender<ToolListChange>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                order: Vec::new(),
                index: HashMap::new(),
            })),
            changes,
        }
    }

    /// Register a tool
    ///
    /// Idempotent by name: re-registering overwrites the existing entry in
    /// place (its listing position is preserved) and is logged. Sessions
    /// subscribed to the registry forward the resulting change event to
    /// their clients as `notifications/tools/list_changed`.
    ///
    /// ## Parameters
    /// - `tool`: the definition to install; its name must be at most 64
    ///   bytes of `[A-Za-z0-9_.-]`
    ///
    /// ## Returns
    /// - `Ok(())`: installed (or overwritten)
    /// - `Err(InvalidName)`: the name violates the length or character rules
    pub fn register(&self, tool: Tool) -> Result<(), RegistryError> {
        validate_name(&tool.name)?;
        let name = tool.name.clone();
        let change = {
            let mut inner = self.inner.write();
            match inner.index.get(&name).copied() {
                Some(slot) => {
                    info!("Overwriting registered tool '{}'", name);
                    inner.order[slot] = Arc::new(tool);
                    ToolListChange::Modified(name.clone())
                }
                None => {
                    debug!("Registering tool '{}'", name);
                    let slot = inner.order.len();
                    inner.order.push(Arc::new(tool));
                    inner.index.insert(name.clone(), slot);
                    ToolListChange::Added(name.clone())
                }
            }
        };
        let _ = self.changes.send(change);
        Ok(())
    }

    /// Remove a tool by name; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            match inner.index.remove(name) {
                Some(slot) => {
                    inner.order.remove(slot);
                    // Positions after the removed slot shift down by one
                    for (pos, tool) in inner.order.iter().enumerate().skip(slot) {
                        inner.index.insert(tool.name.clone(), pos);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!("Unregistered tool '{}'", name);
            let _ = self.changes.send(ToolListChange::Removed(name.to_string()));
        }
        removed
    }

    /// Look up a tool by name
    pub fn lookup(&self, name: &str) -> Option<Arc<Tool>> {
        let inner = self.inner.read();
        inner
            .index
            .get(name)
            .map(|&slot| Arc::clone(&inner.order[slot]))
    }

    /// Consistent snapshot of descriptors in insertion order
    ///
    /// A `tools/list` reply is built from one snapshot, so a registration
    /// racing the listing either appears entirely or not at all; it never
    /// produces a torn page. Later registrations surface through the change
    /// broadcast instead.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read();
        inner.order.iter().map(|tool| tool.descriptor()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// Subscribe to registry mutations
    pub fn subscribe(&self) -> broadcast::Receiver<ToolListChange> {
        self.changes.subscribe()
    }
}
