//! Failure kinds surfaced to callers of an assistant turn.

use thiserror::Error;

/// Errors returned by [`crate::process::ProcessManager`],
/// [`crate::bridge::SdkManager`] and the [`crate::assistant::Assistant`] facade.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// The subprocess or SDK call exceeded its time budget.
    #[error("Copilot timed out after {seconds}s")]
    Timeout { seconds: u64 },
    /// The CLI failed with no usable output, or the SDK raised an error.
    #[error("{0}")]
    Process(String),
    /// The CLI binary could not be started at all.
    #[error("failed to start Copilot CLI: {0}")]
    Spawn(#[source] std::io::Error),
}

impl AssistantError {
    /// Short machine-readable label, used for `error_type` in responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::Timeout { .. } => "timeout",
            AssistantError::Process(_) => "process",
            AssistantError::Spawn(_) => "spawn",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
