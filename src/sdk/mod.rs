//! The seam between the session bridge and the Copilot SDK server.
//!
//! [`AssistantClient`] and [`AssistantSession`] are what
//! [`crate::bridge::SdkManager`] drives; [`SessionHooks`] is what the
//! server calls back into while a turn runs.  [`copilot::CopilotClient`]
//! implements the client on top of the `copilot_sdk` crate.

pub mod copilot;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use copilot::CopilotClient;

// ---------------------------------------------------------------------------
// Client / session traits
// ---------------------------------------------------------------------------

/// A long-lived connection to the assistant server.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Connect.  Calling `start` on a started client is a no-op.
    async fn start(&self) -> anyhow::Result<()>;

    /// Disconnect and release the server process.
    async fn stop(&self) -> anyhow::Result<()>;

    async fn create_session(&self, config: SessionConfig)
        -> anyhow::Result<Arc<dyn AssistantSession>>;

    async fn resume_session(
        &self,
        session_id: &str,
        config: ResumeSessionConfig,
    ) -> anyhow::Result<Arc<dyn AssistantSession>>;
}

/// Callback invoked for every event a session emits.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// A conversation on the assistant server.
#[async_trait]
pub trait AssistantSession: Send + Sync {
    fn session_id(&self) -> String;

    /// Register an event handler for this session.
    fn on(&self, handler: EventHandler);

    /// Drop every handler registered with [`AssistantSession::on`].
    fn clear_handlers(&self);

    /// Send a prompt and wait until the session goes idle.
    ///
    /// Returns the final assistant message event, if one arrived.
    async fn send_and_wait(&self, prompt: &str) -> anyhow::Result<Option<SessionEvent>>;

    /// Discard the session on the server. It cannot be resumed afterwards.
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Builds the client on first use.
pub type ClientFactory = Box<dyn Fn() -> anyhow::Result<Arc<dyn AssistantClient>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Hooks called by the server mid-turn
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn on_permission_request(&self, request: PermissionRequest) -> PermissionDecision;

    async fn on_user_input_request(&self, request: UserInputRequest) -> UserInputResponse;

    /// `None` lets the tool run.
    async fn on_pre_tool_use(&self, input: PreToolUseInput) -> Option<PreToolUseOutput>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default = "unknown_kind")]
    pub kind: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Kind-specific details (command text, file path, URL, ...).
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

fn unknown_kind() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Approved,
    Denied,
}

impl PermissionDecision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            PermissionDecision::Approved
        } else {
            PermissionDecision::Denied
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_freeform: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputResponse {
    pub answer: String,
    pub was_freeform: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseInput {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseOutput {
    /// `"allow"`, `"deny"` or `"ask"`.
    pub permission_decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Session configuration
// ---------------------------------------------------------------------------

/// Background compaction settings for long-running sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteSessionConfig {
    pub enabled: bool,
    pub background_compaction_threshold: f64,
    pub buffer_exhaustion_threshold: f64,
}

impl InfiniteSessionConfig {
    /// Compaction at `threshold`, buffer exhaustion 15 points later (capped at 0.99).
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            enabled: true,
            background_compaction_threshold: threshold,
            buffer_exhaustion_threshold: (threshold + 0.15).min(0.99),
        }
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub model: String,
    pub working_directory: PathBuf,
    /// Emit message and reasoning deltas.
    pub streaming: bool,
    pub infinite_sessions: Option<InfiniteSessionConfig>,
    pub hooks: Arc<dyn SessionHooks>,
}

#[derive(Clone)]
pub struct ResumeSessionConfig {
    pub working_directory: PathBuf,
    pub streaming: bool,
    pub hooks: Arc<dyn SessionHooks>,
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// Events a session emits while processing a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A complete assistant message.
    AssistantMessage { content: String },
    MessageDelta { delta: String },
    ReasoningDelta { delta: String },
    ToolUse { tool_name: String, tool_args: Value },
    ToolResult { tool_name: String, tool_args: Value },
    /// The session finished processing the prompt.
    Idle,
    Error { message: String },
    Other { kind: String },
}

impl SessionEvent {
    /// Decode a `{ type, data }` event from the server.
    ///
    /// Both the dotted (`assistant.message_delta`) and snake-case
    /// (`assistant_message`) spellings are accepted, as are camel- and
    /// snake-case field names.
    pub fn from_wire(kind: &str, data: &Value) -> Self {
        let text = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| data.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string()
        };
        let tool_name = || text(&["toolName", "tool_name"]);
        let tool_args = || {
            ["arguments", "toolArgs", "tool_args"]
                .iter()
                .find_map(|k| data.get(*k).cloned())
                .unwrap_or(Value::Null)
        };

        match kind {
            "assistant.message" | "assistant_message" => SessionEvent::AssistantMessage {
                content: text(&["content"]),
            },
            "assistant.message_delta" => SessionEvent::MessageDelta {
                delta: text(&["deltaContent", "delta_content"]),
            },
            "assistant.reasoning_delta" => SessionEvent::ReasoningDelta {
                delta: text(&["deltaContent", "delta_content"]),
            },
            "tool.execution_start" | "tool_use" => SessionEvent::ToolUse {
                tool_name: tool_name(),
                tool_args: tool_args(),
            },
            "tool.execution_complete" | "tool_result" => SessionEvent::ToolResult {
                tool_name: tool_name(),
                tool_args: tool_args(),
            },
            "session.idle" => SessionEvent::Idle,
            "session.error" => SessionEvent::Error {
                message: text(&["message"]),
            },
            other => SessionEvent::Other {
                kind: other.to_string(),
            },
        }
    }

    /// Text of an assistant message event.
    pub fn content(&self) -> Option<&str> {
        match self {
            SessionEvent::AssistantMessage { content } => Some(content),
            _ => None,
        }
    }
}
