//! # Async Task Engine Module
//!
//! Executes request-scoped work off the session's receive path. A bounded
//! pool of cooperative workers pulls submitted tasks from a FIFO queue; each
//! task may stream progress notifications and is subject to cooperative
//! cancellation and a per-task deadline.
//!
//! ## Ordering Guarantees
//!
//! Responses from distinct tasks interleave freely, but for a single request
//! id the emitted sequence is always `progress* terminal`: at most one
//! terminal response is ever emitted under an id, and no progress follows
//! it. Both paths serialize through a per-task emission lock, so the
//! guarantee holds on the outbound channel itself, not just logically.
//!
//! ## Failure Channels
//!
//! A tool returning an application error is surfaced as a *successful*
//! response whose content carries the error text with `isError: true`. Only
//! engine and protocol faults (cancellation, timeout, resource limits,
//! internal errors) use the JSON-RPC error channel.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::defaults;
use crate::protocol::{
    ErrorCode, Message, MetaProgress, Method, ProgressParams, RequestId,
};
use crate::registry::{Tool, ToolHandler, ToolOutcome};

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker
    Pending,

    /// Executing on a worker
    Running,

    /// Producing its terminal response
    Finishing,

    /// Terminated by cancellation
    Cancelled,

    /// Terminated by deadline expiry
    TimedOut,

    /// Terminated normally (success or application error)
    Done,
}

impl TaskState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::TimedOut | TaskState::Done
        )
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reject new submissions beyond this many pending tasks
    pub max_pending_tasks: usize,

    /// Default per-task deadline; zero disables
    pub default_timeout: Duration,

    /// Number of workers pulling from the queue
    pub workers: usize,

    /// Capacity of the completed-task introspection ring
    pub completed_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pending_tasks: defaults::MAX_PENDING_TASKS,
            default_timeout: Duration::from_millis(defaults::TASK_TIMEOUT_MS),
            workers: defaults::TASK_WORKERS,
            completed_capacity: 16,
        }
    }
}

/// State shared between the engine, a worker, and the task's context
struct TaskShared {
    request_id: RequestId,
    tool_name: String,
    progress_token: Option<String>,
    started_at: Instant,
    deadline: Option<Instant>,
    state: Mutex<TaskState>,
    cancel: AtomicBool,
    cancel_notify: Notify,
    /// Serializes progress against the terminal; true once the terminal
    /// response has been pushed to the outbound channel
    emission: tokio::sync::Mutex<bool>,
    last_progress: AtomicU64,
    last_total: AtomicU64,
    reported_progress: AtomicBool,
}

impl TaskShared {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> TaskState {
        *self.state.lock()
    }
}

/// Record of a finished task, kept in a bounded ring for introspection
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Request id in display form
    pub request_id: String,

    /// Tool that ran
    pub tool_name: String,

    /// Terminal state
    pub state: TaskState,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Submission failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The pending-task limit is reached; reply `-32011` synchronously
    #[error("too many pending tasks")]
    Limit,

    /// A task with the same request id is already pending
    #[error("duplicate request id")]
    Duplicate,
}

/// Engine counters, shared with the session's stats
#[derive(Debug, Default)]
pub struct EngineStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub cancelled: AtomicU64,
    pub timed_out: AtomicU64,
    pub rejected: AtomicU64,
    pub app_errors: AtomicU64,
}

/// Capability handed to asynchronous tools
///
/// Bundles the cancellation flag, the progress reporter, and cooperative
/// yield helpers. Holds only a sender clone back to the session; it never
/// owns session state.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<TaskShared>,
    outbound: mpsc::Sender<Message>,
}

impl TaskContext {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled()
    }

    /// Yield to the scheduler (a cancellation observation point)
    pub async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }

    /// Sleep cooperatively; returns `false` if cancelled during the pause
    pub async fn pause(&self, duration: Duration) -> bool {
        if self.shared.cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.shared.cancelled(),
            _ = self.shared.cancel_notify.notified() => false,
        }
    }

    /// Emit a progress update
    ///
    /// Progress is monotonically non-decreasing per task; regressions are
    /// skipped and values above `total` are clamped. No update is emitted
    /// once the terminal response exists. Returns `false` when the task
    /// should stop (cancelled or already terminal).
    pub async fn progress(&self, progress: u64, total: u64, message: Option<String>) -> bool {
        if self.shared.cancelled() {
            return false;
        }
        let token = match &self.shared.progress_token {
            Some(token) => token.clone(),
            // Without a token there is nothing to scope updates to
            None => return true,
        };

        let mut progress = progress;
        if total > 0 && progress > total {
            debug!(
                "Clamping progress {} to total {} for task {}",
                progress, total, self.shared.request_id
            );
            progress = total;
        }

        let previous = self.shared.last_progress.fetch_max(progress, Ordering::AcqRel);
        if progress < previous {
            debug!(
                "Skipping out-of-order progress {} (< {}) for task {}",
                progress, previous, self.shared.request_id
            );
            return true;
        }
        self.shared.last_total.store(total, Ordering::Release);
        self.shared.reported_progress.store(true, Ordering::Release);

        let emitted = self.shared.emission.lock().await;
        if *emitted {
            return false;
        }
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
            details: None,
        };
        let notification = Message::notification(
            Method::Progress,
            serde_json::to_value(&params).ok(),
        );
        if self.outbound.send(notification).await.is_err() {
            return false;
        }
        drop(emitted);
        !self.shared.cancelled()
    }
}

struct QueuedTask {
    shared: Arc<TaskShared>,
    tool: Arc<Tool>,
    arguments: Value,
}

/// Cooperative task engine bound to one session
pub struct TaskEngine {
    queue_tx: mpsc::Sender<QueuedTask>,
    pending: Arc<Mutex<HashMap<RequestId, Arc<TaskShared>>>>,
    completed: Arc<Mutex<VecDeque<TaskSnapshot>>>,
    outbound: mpsc::Sender<Message>,
    config: EngineConfig,
    stats: Arc<EngineStats>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskEngine {
    /// Create an engine and start its workers
    pub fn new(config: EngineConfig, outbound: mpsc::Sender<Message>) -> Self {
        let queue_capacity = config.max_pending_tasks.max(1);
        let (queue_tx, queue_rx) = mpsc::channel::<QueuedTask>(queue_capacity);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let pending = Arc::new(Mutex::new(HashMap::new()));
        let completed = Arc::new(Mutex::new(VecDeque::new()));
        let stats = Arc::new(EngineStats::default());

        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue_rx = Arc::clone(&queue_rx);
            let pending = Arc::clone(&pending);
            let completed = Arc::clone(&completed);
            let stats = Arc::clone(&stats);
            let outbound = outbound.clone();
            let completed_capacity = config.completed_capacity;
            workers.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = next else {
                        debug!("Task worker {} shutting down", worker_id);
                        break;
                    };
                    run_task(
                        task,
                        &outbound,
                        &pending,
                        &completed,
                        &stats,
                        completed_capacity,
                    )
                    .await;
                }
            }));
        }

        Self {
            queue_tx,
            pending,
            completed,
            outbound,
            config,
            stats,
            workers,
        }
    }

    /// Submit a tool invocation as a task bound to `request_id`
    ///
    /// The task enters `Pending` and is queued for the next free worker; its
    /// deadline starts counting from submission, using the tool's declared
    /// duration when present and the engine default otherwise.
    ///
    /// ## Parameters
    /// - `request_id`: the id under which the terminal response is emitted
    /// - `tool`: resolved registry entry to execute
    /// - `arguments`: tool arguments as given by the client
    /// - `progress_token`: scope for progress notifications; without one the
    ///   task runs silently until its terminal
    ///
    /// ## Returns
    /// - `Ok(())`: queued; the reply arrives later through the outbound
    ///   channel
    /// - `Err(Limit)`: the pending bound is reached; answer `-32011` now
    /// - `Err(Duplicate)`: a task with this id is already in flight
    ///
    /// The rejection paths are synchronous so the session can answer the
    /// client immediately.
    pub fn submit(
        &self,
        request_id: RequestId,
        tool: Arc<Tool>,
        arguments: Value,
        progress_token: Option<String>,
    ) -> Result<(), SubmitError> {
        let timeout = tool
            .estimated_duration
            .or_else(|| {
                if self.config.default_timeout.is_zero() {
                    None
                } else {
                    Some(self.config.default_timeout)
                }
            });
        let now = Instant::now();
        let shared = Arc::new(TaskShared {
            request_id: request_id.clone(),
            tool_name: tool.name.clone(),
            progress_token,
            started_at: now,
            deadline: timeout.map(|t| now + t),
            state: Mutex::new(TaskState::Pending),
            cancel: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            emission: tokio::sync::Mutex::new(false),
            last_progress: AtomicU64::new(0),
            last_total: AtomicU64::new(0),
            reported_progress: AtomicBool::new(false),
        });

        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&request_id) {
                return Err(SubmitError::Duplicate);
            }
            if pending.len() >= self.config.max_pending_tasks {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(SubmitError::Limit);
            }
            pending.insert(request_id.clone(), Arc::clone(&shared));
        }

        let queued = QueuedTask {
            shared,
            tool,
            arguments,
        };
        if self.queue_tx.try_send(queued).is_err() {
            self.pending.lock().remove(&request_id);
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SubmitError::Limit);
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        debug!("Submitted task for request {}", request_id);
        Ok(())
    }

    /// Request cooperative cancellation of a pending task
    ///
    /// Sets the task's cancel flag and wakes whatever is waiting on it.
    /// A running task observes the flag at its next yield point or progress
    /// emission and terminates with a cancelled response; a task still in
    /// the queue is caught at worker pickup. Forcible interruption is not
    /// provided.
    ///
    /// ## Returns
    /// Whether a non-terminal task with that id was found. A `false` here
    /// usually means the task already emitted its terminal, in which case
    /// the cancellation is a harmless no-op.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let shared = {
            let pending = self.pending.lock();
            pending.get(request_id).cloned()
        };
        match shared {
            Some(shared) => {
                shared.cancel.store(true, Ordering::Release);
                shared.cancel_notify.notify_one();
                debug!("Cancellation requested for task {}", request_id);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task
    pub fn cancel_all(&self) {
        let entries: Vec<_> = self.pending.lock().values().cloned().collect();
        for shared in entries {
            shared.cancel.store(true, Ordering::Release);
            shared.cancel_notify.notify_one();
        }
    }

    /// Number of tasks not yet terminal
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Emit timeout terminals for tasks whose deadline passed while they
    /// were still queued (a busy worker pool cannot observe those itself)
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<_> = {
            let pending = self.pending.lock();
            pending
                .values()
                .filter(|shared| {
                    shared.state() == TaskState::Pending
                        && shared.deadline.is_some_and(|d| d <= now)
                })
                .cloned()
                .collect()
        };
        for shared in expired {
            warn!(
                "Task {} ({}) expired before a worker picked it up",
                shared.request_id, shared.tool_name
            );
            let message = Message::response_err(
                Some(shared.request_id.clone()),
                ErrorCode::Timeout,
            );
            if emit_terminal(
                &shared,
                message,
                TaskState::TimedOut,
                &self.outbound,
                &self.pending,
                &self.completed,
                self.config.completed_capacity,
            )
            .await
            {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Wait until every task has reached its terminal, bounded by `grace`
    ///
    /// Returns `true` when fully drained within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.pending_count() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "Task drain grace expired with {} tasks outstanding",
                    self.pending_count()
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Cancel everything, drain, and stop the workers
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.cancel_all();
        let drained = self.drain(grace).await;
        for worker in self.workers.drain(..) {
            worker.abort();
        }
        drained
    }

    /// Snapshot of the completed-task ring, oldest first
    pub fn completed_tasks(&self) -> Vec<TaskSnapshot> {
        self.completed.lock().iter().cloned().collect()
    }

    /// Engine counters
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }
}

/// Push the terminal response for a task, exactly once
///
/// Returns `false` (with a warning) when a terminal was already emitted
/// under this id; in that case nothing is sent.
async fn emit_terminal(
    shared: &Arc<TaskShared>,
    message: Message,
    state: TaskState,
    outbound: &mpsc::Sender<Message>,
    pending: &Arc<Mutex<HashMap<RequestId, Arc<TaskShared>>>>,
    completed: &Arc<Mutex<VecDeque<TaskSnapshot>>>,
    completed_capacity: usize,
) -> bool {
    {
        let mut emitted = shared.emission.lock().await;
        if *emitted {
            warn!(
                "Suppressing second terminal for task {} (already {:?})",
                shared.request_id,
                shared.state()
            );
            return false;
        }
        *emitted = true;
        shared.set_state(state);
        // Free the pending slot before the terminal hits the wire so a
        // client reacting to the response never races the limit check
        pending.lock().remove(&shared.request_id);
        if outbound.send(message).await.is_err() {
            debug!(
                "Outbound channel closed before terminal for task {}",
                shared.request_id
            );
        }
    }

    let snapshot = TaskSnapshot {
        request_id: shared.request_id.to_string(),
        tool_name: shared.tool_name.clone(),
        state,
        duration_ms: shared.started_at.elapsed().as_millis() as u64,
    };
    let mut ring = completed.lock();
    if ring.len() >= completed_capacity.max(1) {
        ring.pop_front();
    }
    ring.push_back(snapshot);
    true
}

/// Convert a tool outcome into the terminal response message
fn outcome_to_message(
    shared: &Arc<TaskShared>,
    outcome: ToolOutcome,
    stats: &Arc<EngineStats>,
) -> (Message, TaskState) {
    let id = shared.request_id.clone();
    let mut result = match outcome {
        Ok(result) => result,
        Err(app_error) => {
            stats.app_errors.fetch_add(1, Ordering::Relaxed);
            crate::protocol::CallToolResult::error(app_error)
        }
    };
    if result.meta.is_none() && shared.reported_progress.load(Ordering::Acquire) {
        result.meta = Some(MetaProgress {
            progress: shared.last_progress.load(Ordering::Acquire),
            total: shared.last_total.load(Ordering::Acquire),
        });
    }
    match serde_json::to_value(&result) {
        Ok(value) => (Message::response_ok(id, value), TaskState::Done),
        Err(e) => {
            warn!("Failed to serialize tool result: {}", e);
            (
                Message::response_err(Some(id), ErrorCode::InternalError),
                TaskState::Done,
            )
        }
    }
}

/// Execute one queued task to its terminal response
async fn run_task(
    task: QueuedTask,
    outbound: &mpsc::Sender<Message>,
    pending: &Arc<Mutex<HashMap<RequestId, Arc<TaskShared>>>>,
    completed: &Arc<Mutex<VecDeque<TaskSnapshot>>>,
    stats: &Arc<EngineStats>,
    completed_capacity: usize,
) {
    let shared = task.shared;

    // A sweep may have emitted a timeout terminal while this sat queued
    if shared.state().is_terminal() {
        return;
    }

    // Cancelled before any work started
    if shared.cancelled() {
        let message =
            Message::response_err(Some(shared.request_id.clone()), ErrorCode::Cancelled);
        if emit_terminal(
            &shared,
            message,
            TaskState::Cancelled,
            outbound,
            pending,
            completed,
            completed_capacity,
        )
        .await
        {
            stats.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        return;
    }

    // Deadline passed while queued
    let now = Instant::now();
    if shared.deadline.is_some_and(|d| d <= now) {
        let message =
            Message::response_err(Some(shared.request_id.clone()), ErrorCode::Timeout);
        if emit_terminal(
            &shared,
            message,
            TaskState::TimedOut,
            outbound,
            pending,
            completed,
            completed_capacity,
        )
        .await
        {
            stats.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        return;
    }

    shared.set_state(TaskState::Running);
    debug!(
        "Task {} ({}) running",
        shared.request_id, shared.tool_name
    );

    enum RunOutcome {
        Finished(ToolOutcome),
        Cancelled,
        TimedOut,
    }

    let run = match &task.tool.handler {
        ToolHandler::Sync(handler) => {
            // Synchronous handlers are non-blocking by contract; they run to
            // completion and observe cancellation only afterwards
            RunOutcome::Finished(handler(task.arguments))
        }
        ToolHandler::Async(handler) => {
            let ctx = TaskContext {
                shared: Arc::clone(&shared),
                outbound: outbound.clone(),
            };
            let fut = handler(ctx, task.arguments);
            match shared.deadline {
                Some(deadline) => {
                    tokio::select! {
                        outcome = fut => RunOutcome::Finished(outcome),
                        _ = shared.cancel_notify.notified() => RunOutcome::Cancelled,
                        _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
                    }
                }
                None => {
                    tokio::select! {
                        outcome = fut => RunOutcome::Finished(outcome),
                        _ = shared.cancel_notify.notified() => RunOutcome::Cancelled,
                    }
                }
            }
        }
    };

    shared.set_state(TaskState::Finishing);
    let (message, state) = match run {
        RunOutcome::Finished(outcome) => {
            // A cancellation that raced completion still wins: the terminal
            // has not been emitted yet
            if shared.cancelled() {
                (
                    Message::response_err(
                        Some(shared.request_id.clone()),
                        ErrorCode::Cancelled,
                    ),
                    TaskState::Cancelled,
                )
            } else {
                outcome_to_message(&shared, outcome, stats)
            }
        }
        RunOutcome::Cancelled => (
            Message::response_err(Some(shared.request_id.clone()), ErrorCode::Cancelled),
            TaskState::Cancelled,
        ),
        RunOutcome::TimedOut => (
            Message::response_err(Some(shared.request_id.clone()), ErrorCode::Timeout),
            TaskState::TimedOut,
        ),
    };

    if emit_terminal(
        &shared,
        message,
        state,
        outbound,
        pending,
        completed,
        completed_capacity,
    )
    .await
    {
        match state {
            TaskState::Cancelled => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            TaskState::TimedOut => {
                stats.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallToolResult, ResponseBody};
    use serde_json::json;

    fn engine(config: EngineConfig) -> (TaskEngine, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(64);
        (TaskEngine::new(config, tx), rx)
    }

    fn echo_tool() -> Arc<Tool> {
        Arc::new(Tool::sync("echo", "echo", Value::Null, |args| {
            let text = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(CallToolResult::text(format!("echo: {}", text)))
        }))
    }

    fn slow_tool(step: Duration, steps: u64) -> Arc<Tool> {
        Arc::new(Tool::async_fn("slow", "slow", Value::Null, move |ctx, _| {
            Box::pin(async move {
                for i in 0..steps {
                    if !ctx.pause(step).await {
                        return Err("interrupted".to_string());
                    }
                    if !ctx.progress(i + 1, steps, None).await {
                        return Err("interrupted".to_string());
                    }
                }
                Ok(CallToolResult::text("done"))
            })
        }))
    }

    async fn next_terminal(rx: &mut mpsc::Receiver<Message>) -> Message {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("terminal in time")
                .expect("channel open");
            if matches!(msg, Message::Response { .. }) {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn sync_tool_completes() {
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(
                RequestId::from("1"),
                echo_tool(),
                json!({"message": "hi"}),
                None,
            )
            .unwrap();
        let terminal = next_terminal(&mut rx).await;
        match terminal {
            Message::Response { id, body } => {
                assert_eq!(id, Some(RequestId::from("1")));
                match body {
                    ResponseBody::Result(value) => {
                        assert_eq!(value["content"][0]["text"], "echo: hi");
                        assert!(value.get("isError").is_none());
                    }
                    other => panic!("expected result, got {:?}", other),
                }
            }
            other => panic!("expected response, got {:?}", other),
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn app_error_is_not_a_protocol_error() {
        let tool = Arc::new(Tool::sync("fail", "fails", Value::Null, |_| {
            Err("disk on fire".to_string())
        }));
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(RequestId::from(9), tool, Value::Null, None)
            .unwrap();
        match next_terminal(&mut rx).await {
            Message::Response {
                body: ResponseBody::Result(value),
                ..
            } => {
                assert_eq!(value["isError"], true);
                assert_eq!(value["content"][0]["text"], "disk on fire");
            }
            other => panic!("expected isError result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn progress_precedes_terminal_with_token() {
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(
                RequestId::from("p1"),
                slow_tool(Duration::from_millis(5), 3),
                Value::Null,
                Some("tok".to_string()),
            )
            .unwrap();

        let mut progress_count = 0;
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match msg {
                Message::Notification { method, params } => {
                    assert_eq!(method, "notifications/progress");
                    let params = params.unwrap();
                    assert_eq!(params["progressToken"], "tok");
                    progress_count += 1;
                }
                Message::Response { body, .. } => {
                    assert!(progress_count >= 1);
                    match body {
                        ResponseBody::Result(value) => {
                            assert_eq!(value["content"][0]["text"], "done");
                            // Final progress counters ride along
                            assert_eq!(value["_meta"]["progress"], 3);
                            assert_eq!(value["_meta"]["total"], 3);
                        }
                        other => panic!("expected result, got {:?}", other),
                    }
                    break;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn cancellation_produces_cancelled_terminal() {
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(
                RequestId::from("4"),
                slow_tool(Duration::from_millis(50), 100),
                Value::Null,
                Some("p".to_string()),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(engine.cancel(&RequestId::from("4")));

        match next_terminal(&mut rx).await {
            Message::Response {
                id,
                body: ResponseBody::Error(error),
            } => {
                assert_eq!(id, Some(RequestId::from("4")));
                assert_eq!(error.code, ErrorCode::Cancelled.code());
            }
            other => panic!("expected cancelled terminal, got {:?}", other),
        }
        assert_eq!(engine.pending_count(), 0);
        // Snapshot landed in the completed ring
        let completed = engine.completed_tasks();
        assert_eq!(completed.last().unwrap().state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_id_reports_not_found() {
        let (engine, _rx) = engine(EngineConfig::default());
        assert!(!engine.cancel(&RequestId::from("ghost")));
    }

    #[tokio::test]
    async fn deadline_produces_timeout_terminal() {
        let tool = Arc::new(
            Tool::async_fn("slow", "slow", Value::Null, |ctx, _| {
                Box::pin(async move {
                    loop {
                        if !ctx.pause(Duration::from_millis(50)).await {
                            return Err("interrupted".to_string());
                        }
                    }
                })
            })
            .with_estimated_duration(Duration::from_millis(40)),
        );
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(RequestId::from(1), tool, Value::Null, None)
            .unwrap();
        match next_terminal(&mut rx).await {
            Message::Response {
                body: ResponseBody::Error(error),
                ..
            } => assert_eq!(error.code, ErrorCode::Timeout.code()),
            other => panic!("expected timeout terminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn submission_limit_is_enforced() {
        let (engine, mut rx) = engine(EngineConfig {
            max_pending_tasks: 1,
            workers: 1,
            ..Default::default()
        });
        engine
            .submit(
                RequestId::from("a"),
                slow_tool(Duration::from_millis(20), 50),
                Value::Null,
                None,
            )
            .unwrap();
        let err = engine
            .submit(RequestId::from("b"), echo_tool(), Value::Null, None)
            .unwrap_err();
        assert_eq!(err, SubmitError::Limit);

        engine.cancel(&RequestId::from("a"));
        let _ = next_terminal(&mut rx).await;
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(
                RequestId::from("dup"),
                slow_tool(Duration::from_millis(20), 50),
                Value::Null,
                None,
            )
            .unwrap();
        let err = engine
            .submit(RequestId::from("dup"), echo_tool(), Value::Null, None)
            .unwrap_err();
        assert_eq!(err, SubmitError::Duplicate);

        engine.cancel(&RequestId::from("dup"));
        let _ = next_terminal(&mut rx).await;
    }

    #[tokio::test]
    async fn shutdown_drains_pending_tasks() {
        let (mut engine, mut rx) = engine(EngineConfig::default());
        for i in 0..3 {
            engine
                .submit(
                    RequestId::from(i),
                    slow_tool(Duration::from_millis(50), 200),
                    Value::Null,
                    None,
                )
                .unwrap();
        }
        assert!(engine.shutdown(Duration::from_secs(2)).await);
        assert_eq!(engine.pending_count(), 0);

        // Every task got a cancelled terminal
        let mut cancelled = 0;
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            if let Message::Response {
                body: ResponseBody::Error(error),
                ..
            } = msg
            {
                assert_eq!(error.code, ErrorCode::Cancelled.code());
                cancelled += 1;
            }
        }
        assert_eq!(cancelled, 3);
    }

    #[tokio::test]
    async fn progress_clamps_overflow() {
        let tool = Arc::new(Tool::async_fn("over", "d", Value::Null, |ctx, _| {
            Box::pin(async move {
                // Reports more work than the declared total
                ctx.progress(15, 10, None).await;
                Ok(CallToolResult::text("done"))
            })
        }));
        let (engine, mut rx) = engine(EngineConfig::default());
        engine
            .submit(
                RequestId::from("c"),
                tool,
                Value::Null,
                Some("t".to_string()),
            )
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            Message::Notification { params, .. } => {
                let params = params.unwrap();
                assert_eq!(params["progress"], 10);
                assert_eq!(params["total"], 10);
            }
            other => panic!("expected progress, got {:?}", other),
        }
        let _ = next_terminal(&mut rx).await;
    }
}
