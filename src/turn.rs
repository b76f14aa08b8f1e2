//! Request and response records for a single assistant turn.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

/// One prompt to run in a working directory on behalf of a chat user.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub prompt: String,
    pub working_directory: PathBuf,
    /// Chat user id; with the directory, this keys the SDK session index.
    pub user_id: i64,
    /// Explicit session to continue.  Overrides any stored or discovered id.
    pub session_id: Option<String>,
    /// Continue the previous conversation instead of starting fresh.
    pub continue_session: bool,
    /// Model override; `None` uses the configured default for the path taken.
    pub model: Option<String>,
}

impl ExecuteRequest {
    pub fn new(prompt: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_directory: working_directory.into(),
            user_id: 0,
            session_id: None,
            continue_session: false,
            model: None,
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn continue_session(mut self, yes: bool) -> Self {
        self.continue_session = yes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn directory(&self) -> &Path {
        &self.working_directory
    }
}

/// A tool invocation observed during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUse {
    pub name: String,
    pub input: Value,
}

/// Outcome of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub content: String,
    /// Session the turn ran in; empty when the CLI path could not discover it.
    pub session_id: String,
    pub cost: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub is_error: bool,
    pub error_type: Option<String>,
    pub tools_used: Vec<ToolUse>,
}

impl AssistantResponse {
    pub fn new(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            session_id: session_id.into(),
            cost: 0.0,
            duration_ms: 0,
            num_turns: 1,
            is_error: false,
            error_type: None,
            tools_used: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_defaults_to_fresh_session() {
        let req = ExecuteRequest::new("hi", "/tmp/project");
        assert_eq!(req.user_id, 0);
        assert!(req.session_id.is_none());
        assert!(!req.continue_session);
        assert!(req.model.is_none());
    }

    #[test]
    fn request_builder_chains() {
        let req = ExecuteRequest::new("next", "/tmp/project")
            .user(42)
            .session("abc-123")
            .continue_session(true)
            .model("gpt-5-mini");
        assert_eq!(req.user_id, 42);
        assert_eq!(req.session_id.as_deref(), Some("abc-123"));
        assert!(req.continue_session);
        assert_eq!(req.model.as_deref(), Some("gpt-5-mini"));
        assert_eq!(req.directory(), Path::new("/tmp/project"));
    }

    #[test]
    fn response_defaults() {
        let r = AssistantResponse::new("Hello!", "sess-1");
        assert_eq!(r.num_turns, 1);
        assert_eq!(r.cost, 0.0);
        assert!(!r.is_error);
        assert!(r.tools_used.is_empty());
    }
}
