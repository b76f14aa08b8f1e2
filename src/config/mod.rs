use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models;

/// Top-level configuration loaded from `config.yaml`.
///
/// Every field has a default so an absent or partial file is valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Path to the `copilot` executable.  `None` resolves `copilot` on `PATH`.
    #[serde(default)]
    pub copilot_binary_path: Option<String>,
    /// Model for CLI runs.
    #[serde(default = "default_cli_model")]
    pub copilot_model: String,
    /// Model for SDK sessions.
    #[serde(default = "default_sdk_model")]
    pub copilot_sdk_model: String,
    /// Budget for one whole turn (CLI subprocess or SDK send), in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How long a permission request waits for the chat user before denying.
    #[serde(default = "default_permission_timeout_seconds")]
    pub permission_timeout_seconds: u64,
    /// How long an ask-user request waits before answering empty.
    #[serde(default = "default_ask_user_timeout_seconds")]
    pub ask_user_timeout_seconds: u64,
    /// Copilot session-state directory.  `None` uses `<copilot_home>/session-state`.
    #[serde(default)]
    pub session_state_dir: Option<String>,
    /// Route turns through the SDK first, falling back to the CLI.
    #[serde(default = "default_true")]
    pub use_sdk: bool,
    /// Let the Copilot server compact long sessions in the background.
    #[serde(default = "default_true")]
    pub infinite_sessions: bool,
    /// Context fill ratio that triggers background compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,
    /// Extra arguments appended to `copilot --server --stdio`.
    #[serde(default)]
    pub server_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_cli_model() -> String {
    models::DEFAULT_CLI_MODEL.to_string()
}

fn default_sdk_model() -> String {
    models::DEFAULT_SDK_MODEL.to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_permission_timeout_seconds() -> u64 {
    120
}

fn default_ask_user_timeout_seconds() -> u64 {
    300
}

fn default_compaction_threshold() -> f64 {
    0.80
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            copilot_binary_path: None,
            copilot_model: default_cli_model(),
            copilot_sdk_model: default_sdk_model(),
            timeout_seconds: default_timeout_seconds(),
            permission_timeout_seconds: default_permission_timeout_seconds(),
            ask_user_timeout_seconds: default_ask_user_timeout_seconds(),
            session_state_dir: None,
            use_sdk: true,
            infinite_sessions: true,
            compaction_threshold: default_compaction_threshold(),
            server_args: Vec::new(),
        }
    }
}

impl Settings {
    /// Read and parse a YAML configuration file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub async fn load(path: &Path) -> anyhow::Result<Settings> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "config file not found, using defaults"
                );
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        Self::from_yaml(&contents)
    }

    /// Parse and validate settings from a YAML string.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Settings> {
        // An empty file deserializes to unit, not a mapping.
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }

        let settings: Settings =
            serde_yaml::from_str(contents).context("failed to parse config YAML")?;
        settings.validate()?;

        tracing::debug!(
            cli_model = %settings.copilot_model,
            sdk_model = %settings.copilot_sdk_model,
            use_sdk = settings.use_sdk,
            "configuration loaded"
        );

        Ok(settings)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_seconds == 0 {
            anyhow::bail!("config: timeout_seconds must be greater than zero");
        }
        if self.permission_timeout_seconds == 0 || self.ask_user_timeout_seconds == 0 {
            anyhow::bail!("config: interactive request timeouts must be greater than zero");
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold < 1.0) {
            anyhow::bail!(
                "config: compaction_threshold must be between 0 and 1 (got {})",
                self.compaction_threshold
            );
        }

        // The CLI gains models faster than this list is updated.
        for model in [&self.copilot_model, &self.copilot_sdk_model] {
            if !models::is_known_model(model) {
                tracing::warn!(model = %model, "config: model not in the known Copilot model list");
            }
        }

        Ok(())
    }

    /// The Copilot executable to launch.
    pub fn binary(&self) -> &str {
        self.copilot_binary_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("copilot")
    }

    /// The session-state directory the CLI writes `workspace.yaml` files into.
    pub fn session_state_root(&self) -> PathBuf {
        match &self.session_state_dir {
            Some(dir) => PathBuf::from(dir),
            None => crate::copilot_home().join("session-state"),
        }
    }

    /// Default config location: `<bridge_home>/config.yaml`.
    pub fn default_path() -> PathBuf {
        crate::bridge_home().join("config.yaml")
    }
}
