//! Copilot SDK session bridge.
//!
//! [`SdkManager`] keeps one long-lived [`AssistantClient`] and maps each
//! `(user, working directory)` pair to a resumable SDK session.  Session
//! events are forwarded in order to the front end's [`StreamCallback`];
//! permission and ask-user requests are bridged by [`BridgeHooks`].

pub mod hooks;
pub mod index;

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{AssistantError, Result};
use crate::sdk::{
    AssistantClient, AssistantSession, ClientFactory, CopilotClient, EventHandler,
    InfiniteSessionConfig, ResumeSessionConfig, SessionConfig, SessionEvent, SessionHooks,
};
use crate::stream::{deliver, StreamCallback, StreamUpdate, ToolAction};
use crate::turn::{AssistantResponse, ExecuteRequest};

pub use hooks::BridgeHooks;
pub use index::{session_key, SessionIndex};

enum Forward {
    Event(SessionEvent),
    Done,
}

/// Runs turns through the Copilot SDK with per-user session continuity.
pub struct SdkManager {
    settings: Arc<Settings>,
    factory: ClientFactory,
    client: Mutex<Option<Arc<dyn AssistantClient>>>,
    sessions: SessionIndex,
}

impl SdkManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        let server_settings = settings.clone();
        let factory: ClientFactory = Box::new(move || {
            let client: Arc<dyn AssistantClient> =
                Arc::new(CopilotClient::from_settings(&server_settings));
            Ok(client)
        });
        Self::with_client_factory(settings, factory)
    }

    /// Use `factory` instead of spawning the Copilot server.
    pub fn with_client_factory(settings: Arc<Settings>, factory: ClientFactory) -> Self {
        Self {
            settings,
            factory,
            client: Mutex::new(None),
            sessions: SessionIndex::new(),
        }
    }

    pub fn session_key(user_id: i64, working_directory: &Path) -> String {
        session_key(user_id, working_directory)
    }

    /// Session id remembered for this user and directory.
    pub fn stored_session(&self, user_id: i64, working_directory: &Path) -> Option<String> {
        self.sessions.get(&session_key(user_id, working_directory))
    }

    /// The shared client, created and started on first use.
    ///
    /// A client that fails to start is not kept; the next call retries.
    pub async fn get_client(&self) -> anyhow::Result<Arc<dyn AssistantClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = (self.factory)().context("failed to create Copilot client")?;
        client.start().await.context("failed to start Copilot client")?;
        info!("Copilot SDK client started");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Run one prompt through an SDK session.
    pub async fn execute_command(
        &self,
        request: &ExecuteRequest,
        stream_callback: Option<StreamCallback>,
    ) -> Result<AssistantResponse> {
        let start = Instant::now();
        let seconds = self.settings.timeout_seconds;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);

        let client = self.get_client().await.map_err(sdk_error)?;

        let dir = request.directory();
        let key = session_key(request.user_id, dir);
        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                request
                    .continue_session
                    .then(|| self.sessions.get(&key))
                    .flatten()
            });
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.copilot_sdk_model.clone());

        info!(
            user_id = request.user_id,
            working_directory = %dir.display(),
            session_id = ?session_id,
            continue_session = request.continue_session,
            model = %model,
            "executing via Copilot SDK"
        );

        let hooks: Arc<dyn SessionHooks> = Arc::new(BridgeHooks::new(
            &self.settings,
            stream_callback.clone(),
            dir.to_path_buf(),
            request.user_id,
        ));

        let open = self.open_session(&client, session_id.as_deref(), request, &model, hooks);
        let session = match tokio::time::timeout_at(deadline, open).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(sdk_error(e)),
            Err(_) => return Err(timed_out(seconds)),
        };

        let last_message: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
        let (tx, forwarder) = spawn_forwarder(stream_callback);
        session.on(event_handler(tx.clone(), last_message.clone()));

        let sent = tokio::time::timeout_at(deadline, session.send_and_wait(&request.prompt)).await;
        session.clear_handlers();

        let result_event = match sent {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                abort(forwarder);
                return Err(sdk_error(e));
            }
            Err(_) => {
                abort(forwarder);
                return Err(timed_out(seconds));
            }
        };

        // Let the front end see every streamed update before the final answer.
        let _ = tx.send(Forward::Done);
        if let Some(handle) = forwarder {
            if let Err(e) = handle.await {
                warn!(error = %e, "stream forwarder failed");
            }
        }

        let content = result_event
            .as_ref()
            .and_then(SessionEvent::content)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| last_message.lock().ok().and_then(|m| m.clone()))
            .unwrap_or_default();

        let final_session_id = session.session_id();
        self.sessions.insert(key, final_session_id.clone());

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            session_id = %final_session_id,
            duration_ms,
            content_len = content.len(),
            "Copilot SDK turn completed"
        );

        let mut response = AssistantResponse::new(content, final_session_id);
        response.duration_ms = duration_ms;
        Ok(response)
    }

    /// Drop the remembered session for this user and directory.
    ///
    /// Returns whether one was stored.
    pub fn forget_session(&self, user_id: i64, working_directory: &Path) -> bool {
        let key = session_key(user_id, working_directory);
        let removed = self.sessions.forget(&key);
        if let Some(id) = &removed {
            info!(key = %key, session_id = %id, "forgot Copilot session");
        }
        removed.is_some()
    }

    /// Stop the client.  Stop failures are logged, not returned.
    pub async fn shutdown(&self) {
        let Some(client) = self.client.lock().await.take() else {
            return;
        };
        match client.stop().await {
            Ok(()) => info!("Copilot SDK client stopped"),
            Err(e) => warn!(error = %format!("{e:#}"), "error stopping Copilot SDK client"),
        }
    }

    async fn open_session(
        &self,
        client: &Arc<dyn AssistantClient>,
        session_id: Option<&str>,
        request: &ExecuteRequest,
        model: &str,
        hooks: Arc<dyn SessionHooks>,
    ) -> anyhow::Result<Arc<dyn AssistantSession>> {
        if let (Some(id), true) = (session_id, request.continue_session) {
            let resume = ResumeSessionConfig {
                working_directory: request.working_directory.clone(),
                streaming: true,
                hooks: hooks.clone(),
            };
            match client.resume_session(id, resume).await {
                Ok(session) => {
                    info!(session_id = %id, "resumed Copilot session");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        session_id = %id,
                        error = %format!("{e:#}"),
                        "failed to resume session, creating new"
                    );
                }
            }
        }

        let config = SessionConfig {
            model: model.to_string(),
            working_directory: request.working_directory.clone(),
            streaming: true,
            infinite_sessions: self
                .settings
                .infinite_sessions
                .then(|| InfiniteSessionConfig::with_threshold(self.settings.compaction_threshold)),
            hooks,
        };
        let session = client.create_session(config).await?;
        debug!(session_id = %session.session_id(), "created Copilot session");
        Ok(session)
    }
}

fn sdk_error(e: anyhow::Error) -> AssistantError {
    warn!(error = %format!("{e:#}"), "Copilot SDK turn failed");
    AssistantError::Process(format!("Copilot SDK error: {e:#}"))
}

fn timed_out(seconds: u64) -> AssistantError {
    warn!(seconds, "Copilot SDK turn timed out");
    AssistantError::Timeout { seconds }
}

fn abort(forwarder: Option<JoinHandle<()>>) {
    if let Some(handle) = forwarder {
        handle.abort();
    }
}

/// Session event handler: records assistant messages and queues events
/// for the forwarder.  Runs synchronously on the event source.
fn event_handler(
    tx: mpsc::UnboundedSender<Forward>,
    last_message: Arc<StdMutex<Option<String>>>,
) -> EventHandler {
    Arc::new(move |event: &SessionEvent| {
        if let SessionEvent::AssistantMessage { content } = event {
            if !content.is_empty() {
                if let Ok(mut last) = last_message.lock() {
                    *last = Some(content.clone());
                }
            }
        }
        let _ = tx.send(Forward::Event(event.clone()));
    })
}

/// Deliver queued events to the callback one at a time, in arrival order.
fn spawn_forwarder(
    callback: Option<StreamCallback>,
) -> (mpsc::UnboundedSender<Forward>, Option<JoinHandle<()>>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let Some(cb) = callback else {
        return (tx, None);
    };
    let handle = tokio::spawn(async move {
        while let Some(Forward::Event(event)) = rx.recv().await {
            if let Some(update) = to_stream_update(event) {
                deliver(&cb, update).await;
            }
        }
    });
    (tx, Some(handle))
}

fn to_stream_update(event: SessionEvent) -> Option<StreamUpdate> {
    match event {
        SessionEvent::AssistantMessage { content } | SessionEvent::MessageDelta { delta: content }
            if !content.is_empty() =>
        {
            Some(StreamUpdate::Result {
                content,
                tools_used: None,
            })
        }
        SessionEvent::ReasoningDelta { delta } if !delta.is_empty() => {
            Some(StreamUpdate::Reasoning { content: delta })
        }
        SessionEvent::ToolUse {
            tool_name,
            tool_args,
        } if !tool_name.is_empty() => Some(StreamUpdate::Tool {
            tool_name,
            tool_args,
            action: ToolAction::Pre,
        }),
        SessionEvent::ToolResult {
            tool_name,
            tool_args,
        } if !tool_name.is_empty() => Some(StreamUpdate::Tool {
            tool_name,
            tool_args,
            action: ToolAction::Post,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deltas_and_messages_become_results() {
        let update = to_stream_update(SessionEvent::MessageDelta { delta: "He".into() });
        assert!(matches!(update, Some(StreamUpdate::Result { content, .. }) if content == "He"));

        let update = to_stream_update(SessionEvent::AssistantMessage {
            content: "Hello".into(),
        });
        assert!(matches!(update, Some(StreamUpdate::Result { content, .. }) if content == "Hello"));

        assert!(to_stream_update(SessionEvent::MessageDelta { delta: String::new() }).is_none());
    }

    #[test]
    fn tool_events_map_to_pre_and_post() {
        let pre = to_stream_update(SessionEvent::ToolUse {
            tool_name: "bash".into(),
            tool_args: json!({"command": "ls"}),
        });
        assert!(matches!(pre, Some(StreamUpdate::Tool { action: ToolAction::Pre, .. })));

        let post = to_stream_update(SessionEvent::ToolResult {
            tool_name: "bash".into(),
            tool_args: json!(null),
        });
        assert!(matches!(post, Some(StreamUpdate::Tool { action: ToolAction::Post, .. })));

        let unnamed = to_stream_update(SessionEvent::ToolUse {
            tool_name: String::new(),
            tool_args: json!({}),
        });
        assert!(unnamed.is_none());
    }

    #[test]
    fn lifecycle_events_are_not_forwarded() {
        assert!(to_stream_update(SessionEvent::Idle).is_none());
        assert!(to_stream_update(SessionEvent::Other {
            kind: "session.usage".into()
        })
        .is_none());
    }
}
