//! Bridges the server's interactive requests to the chat front end.
//!
//! Each request becomes a [`StreamUpdate`] carrying a [`Rendezvous`]; the
//! hook then waits for the front end to resolve it, up to a timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::sdk::{
    PermissionDecision, PermissionRequest, PreToolUseInput, PreToolUseOutput, SessionHooks,
    UserInputRequest, UserInputResponse,
};
use crate::stream::{deliver, Rendezvous, StreamCallback, StreamUpdate, ToolAction};

/// [`SessionHooks`] for one turn of one user.
pub struct BridgeHooks {
    callback: Option<StreamCallback>,
    permission_timeout: Duration,
    ask_user_timeout: Duration,
    working_directory: PathBuf,
    user_id: i64,
}

impl BridgeHooks {
    pub fn new(
        settings: &Settings,
        callback: Option<StreamCallback>,
        working_directory: PathBuf,
        user_id: i64,
    ) -> Self {
        Self {
            callback,
            permission_timeout: Duration::from_secs(settings.permission_timeout_seconds),
            ask_user_timeout: Duration::from_secs(settings.ask_user_timeout_seconds),
            working_directory,
            user_id,
        }
    }

    pub fn with_timeouts(mut self, permission: Duration, ask_user: Duration) -> Self {
        self.permission_timeout = permission;
        self.ask_user_timeout = ask_user;
        self
    }
}

#[async_trait]
impl SessionHooks for BridgeHooks {
    async fn on_permission_request(&self, request: PermissionRequest) -> PermissionDecision {
        let kind = request.kind;
        let tool_call_id = request.tool_call_id.unwrap_or_default();

        let Some(cb) = &self.callback else {
            // Nobody to ask.
            debug!(kind = %kind, "no stream callback, auto-approving permission request");
            return PermissionDecision::Approved;
        };

        let (reply, rx) = Rendezvous::pair();
        let update = StreamUpdate::PermissionRequest {
            kind: kind.clone(),
            tool_call_id,
            reply,
        };

        // The deadline covers delivery too: front ends may prompt inline.
        let waited = tokio::time::timeout(self.permission_timeout, async {
            deliver(cb, update).await;
            rx.await
        })
        .await;
        let approved = match waited {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => {
                warn!(kind = %kind, "permission request abandoned, denying");
                false
            }
            Err(_) => {
                warn!(kind = %kind, "permission request timed out, denying");
                false
            }
        };
        info!(kind = %kind, approved, user_id = self.user_id, "permission request answered");
        PermissionDecision::from_approved(approved)
    }

    async fn on_user_input_request(&self, request: UserInputRequest) -> UserInputResponse {
        let allow_freeform = request.allow_freeform;

        let Some(cb) = &self.callback else {
            debug!("no stream callback, answering ask-user with empty string");
            return UserInputResponse {
                answer: String::new(),
                was_freeform: allow_freeform,
            };
        };

        let (reply, rx) = Rendezvous::pair();
        let update = StreamUpdate::AskUser {
            question: request.question,
            choices: request.choices,
            allow_freeform,
            reply,
        };

        let waited = tokio::time::timeout(self.ask_user_timeout, async {
            deliver(cb, update).await;
            rx.await
        })
        .await;
        let answer = match waited {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => {
                warn!("ask-user request abandoned");
                String::new()
            }
            Err(_) => {
                warn!("ask-user request timed out waiting for user response");
                String::new()
            }
        };
        UserInputResponse {
            answer,
            was_freeform: allow_freeform,
        }
    }

    async fn on_pre_tool_use(&self, input: PreToolUseInput) -> Option<PreToolUseOutput> {
        debug!(
            tool_name = %input.tool_name,
            working_directory = %self.working_directory.display(),
            user_id = self.user_id,
            "pre-tool-use hook"
        );
        if let Some(cb) = &self.callback {
            deliver(
                cb,
                StreamUpdate::Tool {
                    tool_name: input.tool_name,
                    tool_args: input.tool_args,
                    action: ToolAction::Pre,
                },
            )
            .await;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::stream_callback;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn hooks(callback: Option<StreamCallback>) -> BridgeHooks {
        BridgeHooks::new(&Settings::default(), callback, PathBuf::from("/work"), 7)
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
    }

    fn permission(kind: &str) -> PermissionRequest {
        serde_json::from_value(json!({"kind": kind, "toolCallId": "call-1"})).unwrap()
    }

    fn question(text: &str) -> UserInputRequest {
        serde_json::from_value(json!({"question": text, "choices": ["a", "b"]})).unwrap()
    }

    #[tokio::test]
    async fn permission_without_callback_is_approved() {
        let decision = hooks(None).on_permission_request(permission("shell")).await;
        assert_eq!(decision, PermissionDecision::Approved);
    }

    #[tokio::test]
    async fn permission_resolved_by_front_end() {
        let cb = stream_callback(|u: StreamUpdate| async move {
            if let StreamUpdate::PermissionRequest {
                kind,
                tool_call_id,
                reply,
            } = u
            {
                assert_eq!(kind, "write");
                assert_eq!(tool_call_id, "call-1");
                reply.resolve(false);
            }
            Ok(())
        });
        let decision = hooks(Some(cb)).on_permission_request(permission("write")).await;
        assert_eq!(decision, PermissionDecision::Denied);
    }

    #[tokio::test]
    async fn permission_resolved_later_from_another_task() {
        let cb = stream_callback(|u: StreamUpdate| async move {
            if let StreamUpdate::PermissionRequest { reply, .. } = u {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    reply.resolve(true);
                });
            }
            Ok(())
        });
        let decision = hooks(Some(cb)).on_permission_request(permission("shell")).await;
        assert_eq!(decision, PermissionDecision::Approved);
    }

    #[tokio::test]
    async fn permission_timeout_denies() {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let parked2 = parked.clone();
        let cb = stream_callback(move |u: StreamUpdate| {
            let parked = parked2.clone();
            async move {
                // Hold the rendezvous without answering.
                parked.lock().unwrap().push(u);
                Ok(())
            }
        });
        let decision = hooks(Some(cb)).on_permission_request(permission("shell")).await;
        assert_eq!(decision, PermissionDecision::Denied);
        assert_eq!(parked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permission_timeout_covers_inline_prompt() {
        // A front end that holds the reply and blocks inside the callback.
        let cb = stream_callback(|u: StreamUpdate| async move {
            let _held = u;
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        });
        let started = std::time::Instant::now();
        let decision = hooks(Some(cb)).on_permission_request(permission("shell")).await;
        assert_eq!(decision, PermissionDecision::Denied);
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn dropped_rendezvous_denies() {
        let cb = stream_callback(|_u: StreamUpdate| async move { Ok(()) });
        let decision = hooks(Some(cb)).on_permission_request(permission("url")).await;
        assert_eq!(decision, PermissionDecision::Denied);
    }

    #[tokio::test]
    async fn ask_user_without_callback_answers_empty() {
        let resp = hooks(None).on_user_input_request(question("Which branch?")).await;
        assert_eq!(resp.answer, "");
        assert!(resp.was_freeform);
    }

    #[tokio::test]
    async fn ask_user_answer_is_returned() {
        let cb = stream_callback(|u: StreamUpdate| async move {
            if let StreamUpdate::AskUser {
                question,
                choices,
                reply,
                ..
            } = u
            {
                assert_eq!(question, "Which branch?");
                assert_eq!(choices, vec!["a", "b"]);
                reply.resolve("b".into());
            }
            Ok(())
        });
        let resp = hooks(Some(cb))
            .on_user_input_request(question("Which branch?"))
            .await;
        assert_eq!(resp.answer, "b");
    }

    #[tokio::test]
    async fn ask_user_timeout_answers_empty() {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let parked2 = parked.clone();
        let cb = stream_callback(move |u: StreamUpdate| {
            let parked = parked2.clone();
            async move {
                parked.lock().unwrap().push(u);
                Ok(())
            }
        });
        let resp = hooks(Some(cb)).on_user_input_request(question("?")).await;
        assert_eq!(resp.answer, "");
    }

    #[tokio::test]
    async fn ask_user_timeout_covers_inline_prompt() {
        let cb = stream_callback(|u: StreamUpdate| async move {
            let _held = u;
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        });
        let started = std::time::Instant::now();
        let resp = hooks(Some(cb)).on_user_input_request(question("?")).await;
        assert_eq!(resp.answer, "");
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn pre_tool_use_emits_tool_and_allows() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb = stream_callback(move |u: StreamUpdate| {
            let seen = seen2.clone();
            async move {
                if let StreamUpdate::Tool {
                    tool_name, action, ..
                } = u
                {
                    seen.lock().unwrap().push((tool_name, action));
                }
                Ok(())
            }
        });
        let input: PreToolUseInput =
            serde_json::from_value(json!({"toolName": "bash", "toolArgs": {"command": "ls"}}))
                .unwrap();
        assert!(hooks(Some(cb)).on_pre_tool_use(input).await.is_none());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("bash".to_string(), ToolAction::Pre)]
        );
    }
}
