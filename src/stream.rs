//! Streaming updates pushed from an assistant turn to the chat front end.
//!
//! The front end hands the managers a [`StreamCallback`]; every piece of
//! progress (text, reasoning, tool activity) and every interactive request
//! (permission, ask-user) arrives as a [`StreamUpdate`].  Interactive
//! requests carry a [`Rendezvous`] the front end must resolve.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

/// Whether a tool event fires before or after the tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    Pre,
    Post,
}

impl ToolAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolAction::Pre => "pre",
            ToolAction::Post => "post",
        }
    }
}

/// A single-assignment reply slot.
///
/// The request side keeps the matching receiver and suspends on it; the
/// front end calls [`Rendezvous::resolve`] exactly once.  Dropping an
/// unresolved rendezvous is treated by the request side as a refusal.
pub struct Rendezvous<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Rendezvous<T> {
    /// Create a rendezvous and the receiver the requester waits on.
    pub fn pair() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Hand `value` to the waiting requester.
    ///
    /// Returns `false` if the requester already gave up (timed out).
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    /// True once the requester stopped waiting.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> fmt::Debug for Rendezvous<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendezvous")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Progress or request emitted during a turn.
#[derive(Debug)]
pub enum StreamUpdate {
    /// Assistant text: a streaming delta or the full final message.
    Result {
        content: String,
        /// Number of tools seen while parsing CLI output, when any.
        tools_used: Option<usize>,
    },
    /// Model reasoning delta.
    Reasoning { content: String },
    /// Tool invocation seen before (`Pre`) or after (`Post`) execution.
    Tool {
        tool_name: String,
        tool_args: Value,
        action: ToolAction,
    },
    /// The assistant needs an answer from the user.
    AskUser {
        question: String,
        choices: Vec<String>,
        allow_freeform: bool,
        reply: Rendezvous<String>,
    },
    /// The assistant wants to perform a privileged action.
    PermissionRequest {
        /// `"shell"`, `"write"`, `"read"`, `"mcp"`, `"url"`, ...
        kind: String,
        tool_call_id: String,
        /// `true` approves.
        reply: Rendezvous<bool>,
    },
}

impl StreamUpdate {
    /// Discriminant name, handy for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamUpdate::Result { .. } => "result",
            StreamUpdate::Reasoning { .. } => "reasoning",
            StreamUpdate::Tool { .. } => "tool",
            StreamUpdate::AskUser { .. } => "ask_user",
            StreamUpdate::PermissionRequest { .. } => "permission_request",
        }
    }
}

/// Boxed future returned by a [`StreamCallback`].
pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Front-end hook receiving every [`StreamUpdate`] of a turn.
pub type StreamCallback = Arc<dyn Fn(StreamUpdate) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as a [`StreamCallback`].
pub fn stream_callback<F, Fut>(f: F) -> StreamCallback
where
    F: Fn(StreamUpdate) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |update| Box::pin(f(update)))
}

/// Deliver `update`, logging and swallowing any front-end error.
pub async fn deliver(callback: &StreamCallback, update: StreamUpdate) {
    let kind = update.kind();
    if let Err(e) = callback(update).await {
        tracing::warn!(kind, error = %e, "stream callback failed");
    }
}
