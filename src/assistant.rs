//! Single entry point for running a turn.
//!
//! SDK first when enabled; a process error from the SDK path gets one
//! retry through the CLI subprocess.  Timeouts are returned as-is.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::SdkManager;
use crate::config::Settings;
use crate::error::{AssistantError, Result};
use crate::process::ProcessManager;
use crate::stream::StreamCallback;
use crate::turn::{AssistantResponse, ExecuteRequest};

pub struct Assistant {
    settings: Arc<Settings>,
    sdk: Option<SdkManager>,
    process: ProcessManager,
}

impl Assistant {
    pub fn new(settings: Arc<Settings>) -> Self {
        let sdk = settings.use_sdk.then(|| SdkManager::new(settings.clone()));
        let process = ProcessManager::new(settings.clone());
        Self {
            settings,
            sdk,
            process,
        }
    }

    /// Build from parts; `sdk = None` runs everything through the CLI.
    pub fn from_parts(settings: Arc<Settings>, sdk: Option<SdkManager>, process: ProcessManager) -> Self {
        Self {
            settings,
            sdk,
            process,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sdk(&self) -> Option<&SdkManager> {
        self.sdk.as_ref()
    }

    pub fn process(&self) -> &ProcessManager {
        &self.process
    }

    pub async fn execute(
        &self,
        request: &ExecuteRequest,
        stream_callback: Option<StreamCallback>,
    ) -> Result<AssistantResponse> {
        let Some(sdk) = &self.sdk else {
            return self.process.execute_command(request, stream_callback).await;
        };

        match sdk.execute_command(request, stream_callback.clone()).await {
            Err(AssistantError::Process(message)) => {
                warn!(error = %message, "SDK turn failed, falling back to Copilot CLI");
                self.process.execute_command(request, stream_callback).await
            }
            other => other,
        }
    }

    /// Start the next turn for this user and directory in a fresh session.
    pub fn forget_session(&self, user_id: i64, working_directory: &Path) -> bool {
        self.sdk
            .as_ref()
            .is_some_and(|sdk| sdk.forget_session(user_id, working_directory))
    }

    /// Stop the SDK client and kill any running CLI processes.
    pub async fn shutdown(&self) {
        if let Some(sdk) = &self.sdk {
            sdk.shutdown().await;
        }
        self.process.kill_all_processes();
        info!("assistant shut down");
    }
}
