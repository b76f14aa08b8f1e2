//! [`AssistantClient`] on top of the `copilot_sdk` crate.
//!
//! The SDK owns the server process and its JSON-RPC connection.  This
//! module converts between its types and the bridge's seam, and routes the
//! server's permission, ask-user and hook requests to the session's
//! [`SessionHooks`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use copilot_sdk::{
    CopilotError, HooksHandlerFn, MessageOptions, PermissionHandlerFn, PermissionRequestResult,
    PermissionResultKind, Subscription, UserInputHandlerFn,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{
    AssistantClient, AssistantSession, EventHandler, InfiniteSessionConfig, PermissionDecision,
    PermissionRequest, PreToolUseInput, ResumeSessionConfig, SessionConfig, SessionEvent,
    SessionHooks, UserInputRequest, UserInputResponse,
};
use crate::config::Settings;

/// Upper bound on spawning the server and its protocol handshake.
const START_TIMEOUT: Duration = Duration::from_secs(30);

type HookFuture<T> = Pin<Box<dyn Future<Output = Result<T, CopilotError>> + Send>>;
type TurnResult = Result<Option<SessionEvent>, String>;

/// Copilot CLI in server mode, driven through the SDK.
pub struct CopilotClient {
    inner: copilot_sdk::CopilotClient,
}

impl CopilotClient {
    pub fn new(binary: impl Into<String>, server_args: Vec<String>) -> Self {
        let options = copilot_sdk::CopilotClientOptions {
            cli_path: Some(binary.into()),
            cli_args: server_args,
            // SdkManager starts the client exactly once.
            auto_start: false,
            ..Default::default()
        };
        Self {
            inner: copilot_sdk::CopilotClient::new(options),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.binary(), settings.server_args.clone())
    }
}

#[async_trait]
impl AssistantClient for CopilotClient {
    async fn start(&self) -> anyhow::Result<()> {
        match tokio::time::timeout(START_TIMEOUT, self.inner.start()).await {
            Ok(Ok(())) => {
                info!("Copilot SDK server started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.force_stop().await;
                Err(e).context("failed to start Copilot SDK server")
            }
            Err(_) => {
                self.inner.force_stop().await;
                anyhow::bail!(
                    "Copilot SDK server did not answer within {}s",
                    START_TIMEOUT.as_secs()
                )
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let errors = self
            .inner
            .stop()
            .await
            .context("failed to stop Copilot SDK server")?;
        for e in errors {
            warn!(error = %e, "session cleanup failed during stop");
        }
        info!("Copilot SDK server stopped");
        Ok(())
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> anyhow::Result<Arc<dyn AssistantSession>> {
        let sdk_config = copilot_sdk::SessionConfig {
            model: Some(config.model),
            working_directory: Some(config.working_directory.to_string_lossy().into_owned()),
            streaming: Some(config.streaming),
            infinite_sessions: config.infinite_sessions.map(Into::into),
            request_permission: Some(true),
            request_user_input: Some(true),
            hooks: Some(true),
            ..Default::default()
        };
        let session = self
            .inner
            .create_session(sdk_config)
            .await
            .context("session.create failed")?;
        debug!(session_id = %session.session_id(), "Copilot session created");
        Ok(Arc::new(CopilotSession::attach(session, config.hooks).await))
    }

    async fn resume_session(
        &self,
        session_id: &str,
        config: ResumeSessionConfig,
    ) -> anyhow::Result<Arc<dyn AssistantSession>> {
        let sdk_config = copilot_sdk::ResumeSessionConfig {
            session_id: session_id.to_string(),
            working_directory: Some(config.working_directory.to_string_lossy().into_owned()),
            streaming: Some(config.streaming),
            request_permission: Some(true),
            request_user_input: Some(true),
            hooks: Some(true),
            ..Default::default()
        };
        let session = self
            .inner
            .resume_session(sdk_config)
            .await
            .with_context(|| format!("session.resume failed for {session_id}"))?;
        debug!(session_id = %session.session_id(), "Copilot session resumed");
        Ok(Arc::new(CopilotSession::attach(session, config.hooks).await))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// State of an in-flight `send_and_wait`.
struct Turn {
    last_message: Option<SessionEvent>,
    done: oneshot::Sender<TurnResult>,
}

/// Handlers and turn state fed by the SDK's event subscription.
struct SessionShared {
    id: String,
    handlers: StdMutex<Vec<EventHandler>>,
    turn: StdMutex<Option<Turn>>,
}

impl SessionShared {
    fn new(id: String) -> Self {
        Self {
            id,
            handlers: StdMutex::new(Vec::new()),
            turn: StdMutex::new(None),
        }
    }

    fn begin_turn(&self) -> anyhow::Result<oneshot::Receiver<TurnResult>> {
        let (tx, rx) = oneshot::channel();
        let mut turn = self
            .turn
            .lock()
            .map_err(|_| anyhow!("session state poisoned"))?;
        if turn.is_some() {
            anyhow::bail!("session {} is already processing a prompt", self.id);
        }
        *turn = Some(Turn {
            last_message: None,
            done: tx,
        });
        Ok(rx)
    }

    fn end_turn(&self) {
        if let Ok(mut turn) = self.turn.lock() {
            turn.take();
        }
    }

    fn dispatch(&self, event: SessionEvent) {
        let handlers = match self.handlers.lock() {
            Ok(h) => h.clone(),
            Err(_) => Vec::new(),
        };
        for handler in &handlers {
            handler(&event);
        }

        let Ok(mut turn) = self.turn.lock() else {
            return;
        };
        match event {
            SessionEvent::AssistantMessage { .. } => {
                if let Some(t) = turn.as_mut() {
                    t.last_message = Some(event);
                }
            }
            SessionEvent::Idle => {
                if let Some(t) = turn.take() {
                    let _ = t.done.send(Ok(t.last_message));
                }
            }
            SessionEvent::Error { message } => {
                if let Some(t) = turn.take() {
                    let _ = t.done.send(Err(message));
                }
            }
            _ => {}
        }
    }
}

/// An SDK subscription released off the async runtime.
///
/// The SDK unsubscribes with a blocking lock, which must not run on a
/// runtime worker.
struct EventSubscription(StdMutex<Option<Subscription>>);

impl Drop for EventSubscription {
    fn drop(&mut self) {
        let sub = match self.0.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(sub) = sub else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || sub.unsubscribe());
            }
            Err(_) => sub.unsubscribe(),
        }
    }
}

/// Session handle returned by [`CopilotClient`].
struct CopilotSession {
    inner: Arc<copilot_sdk::CopilotSession>,
    shared: Arc<SessionShared>,
    _events: EventSubscription,
}

impl CopilotSession {
    /// Subscribe to the session's events and register `hooks` for its
    /// server requests.
    async fn attach(
        inner: Arc<copilot_sdk::CopilotSession>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(inner.session_id().to_string()));

        let sink = shared.clone();
        let subscription = inner
            .on(move |event: copilot_sdk::SessionEvent| {
                sink.dispatch(SessionEvent::from_wire(&event.event_type, &event.data));
            })
            .await;

        inner
            .register_permission_handler(permission_handler(hooks.clone()))
            .await;
        inner
            .register_user_input_handler(user_input_handler(hooks.clone()))
            .await;
        inner.register_hooks_handler(hooks_handler(hooks)).await;

        Self {
            inner,
            shared,
            _events: EventSubscription(StdMutex::new(Some(subscription))),
        }
    }
}

#[async_trait]
impl AssistantSession for CopilotSession {
    fn session_id(&self) -> String {
        self.shared.id.clone()
    }

    fn on(&self, handler: EventHandler) {
        if let Ok(mut handlers) = self.shared.handlers.lock() {
            handlers.push(handler);
        }
    }

    fn clear_handlers(&self) {
        if let Ok(mut handlers) = self.shared.handlers.lock() {
            handlers.clear();
        }
    }

    async fn send_and_wait(&self, prompt: &str) -> anyhow::Result<Option<SessionEvent>> {
        let rx = self.shared.begin_turn()?;

        let options = MessageOptions {
            prompt: prompt.to_string(),
            attachments: None,
            mode: None,
        };
        if let Err(e) = self.inner.send(options).await {
            self.shared.end_turn();
            return Err(e).context("session.send failed");
        }

        match rx.await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(message)) => Err(anyhow!("session error: {message}")),
            Err(_) => Err(anyhow!("session {} was closed mid-turn", self.shared.id)),
        }
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.inner
            .destroy()
            .await
            .with_context(|| format!("session.destroy failed for {}", self.shared.id))?;
        debug!(session_id = %self.shared.id, "session destroyed");
        Ok(())
    }
}

impl Drop for CopilotSession {
    fn drop(&mut self) {
        if let Ok(mut turn) = self.shared.turn.lock() {
            if turn.take().is_some() {
                warn!(session_id = %self.shared.id, "session dropped mid-turn");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server requests -> SessionHooks
// ---------------------------------------------------------------------------

fn permission_handler(hooks: Arc<dyn SessionHooks>) -> PermissionHandlerFn {
    Arc::new(
        move |request: copilot_sdk::PermissionRequest,
              _session_id: String|
              -> HookFuture<PermissionRequestResult> {
            let hooks = hooks.clone();
            Box::pin(async move {
                let decision = hooks.on_permission_request(request.into()).await;
                Ok(decision.into())
            })
        },
    )
}

fn user_input_handler(hooks: Arc<dyn SessionHooks>) -> UserInputHandlerFn {
    Arc::new(
        move |request: copilot_sdk::UserInputRequest,
              _session_id: String|
              -> HookFuture<copilot_sdk::UserInputResponse> {
            let hooks = hooks.clone();
            Box::pin(async move {
                let response = hooks.on_user_input_request(request.into()).await;
                Ok(response.into())
            })
        },
    )
}

fn hooks_handler(hooks: Arc<dyn SessionHooks>) -> HooksHandlerFn {
    Arc::new(
        move |hook_type: String, input: Value, _session_id: String| -> HookFuture<Option<Value>> {
            let hooks = hooks.clone();
            Box::pin(async move {
                if hook_type != "preToolUse" {
                    debug!(hook_type = %hook_type, "ignoring Copilot hook");
                    return Ok(None);
                }
                let input: PreToolUseInput = serde_json::from_value(input)
                    .map_err(|e| CopilotError::Serialization(e.to_string()))?;
                hooks
                    .on_pre_tool_use(input)
                    .await
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| CopilotError::Serialization(e.to_string()))
            })
        },
    )
}

// ---------------------------------------------------------------------------
// Type conversions
// ---------------------------------------------------------------------------

impl From<copilot_sdk::PermissionRequest> for PermissionRequest {
    fn from(request: copilot_sdk::PermissionRequest) -> Self {
        let kind = serde_json::to_value(&request.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            kind,
            tool_call_id: request.tool_call_id,
            details: request.extra.into_iter().collect(),
        }
    }
}

impl From<PermissionDecision> for PermissionRequestResult {
    fn from(decision: PermissionDecision) -> Self {
        let kind = match decision {
            PermissionDecision::Approved => PermissionResultKind::Approved,
            PermissionDecision::Denied => PermissionResultKind::DeniedInteractivelyByUser,
        };
        Self {
            kind,
            rules: Some(Vec::new()),
        }
    }
}

impl From<copilot_sdk::UserInputRequest> for UserInputRequest {
    fn from(request: copilot_sdk::UserInputRequest) -> Self {
        Self {
            question: request.question,
            choices: request.choices.unwrap_or_default(),
            allow_freeform: request.allow_freeform.unwrap_or(true),
        }
    }
}

impl From<UserInputResponse> for copilot_sdk::UserInputResponse {
    fn from(response: UserInputResponse) -> Self {
        Self {
            answer: response.answer,
            was_freeform: response.was_freeform,
        }
    }
}

impl From<InfiniteSessionConfig> for copilot_sdk::InfiniteSessionConfig {
    fn from(config: InfiniteSessionConfig) -> Self {
        Self {
            enabled: Some(config.enabled),
            background_compaction_threshold: Some(config.background_compaction_threshold),
            buffer_exhaustion_threshold: Some(config.buffer_exhaustion_threshold),
        }
    }
}
