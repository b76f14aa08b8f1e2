//! copilot_bridge: connect a chat front end to the GitHub Copilot CLI.
//!
//! Two execution paths share one response/streaming model:
//! the [`process`] manager shells out to the CLI per turn, while the
//! [`bridge`] manager keeps a long-lived SDK client and resumes sessions
//! per `(user, directory)`.  The [`assistant`] facade picks between them.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod assistant;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod process;
pub mod sdk;
pub mod stream;
pub mod turn;

/// Return the bridge home directory.
///
/// Resolution order:
/// 1. `COPILOT_BRIDGE_HOME` environment variable
/// 2. `$HOME/.copilot-bridge`
pub fn bridge_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("COPILOT_BRIDGE_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".copilot-bridge")
    }
}

/// Return the Copilot CLI's own state directory.
///
/// Resolution order:
/// 1. `COPILOT_HOME` environment variable
/// 2. `$HOME/.copilot`
pub fn copilot_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("COPILOT_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".copilot")
    }
}
