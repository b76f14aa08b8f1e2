//! Models the Copilot CLI accepts for `--model` / session creation.

/// Every model name the Copilot CLI currently accepts.
pub const COPILOT_MODELS: &[&str] = &[
    "claude-sonnet-4.5",
    "claude-haiku-4.5",
    "claude-opus-4.6",
    "claude-opus-4.6-fast",
    "claude-opus-4.5",
    "claude-sonnet-4",
    "gemini-3-pro-preview",
    "gpt-5.3-codex",
    "gpt-5.2-codex",
    "gpt-5.2",
    "gpt-5.1-codex-max",
    "gpt-5.1-codex",
    "gpt-5.1",
    "gpt-5",
    "gpt-5.1-codex-mini",
    "gpt-5-mini",
    "gpt-4.1",
];

/// Model used for CLI runs when neither the request nor the config names one.
pub const DEFAULT_CLI_MODEL: &str = "gpt-5.3-codex";

/// Model used for SDK sessions when neither the request nor the config names one.
pub const DEFAULT_SDK_MODEL: &str = "gpt-5-mini";

pub fn is_known_model(name: &str) -> bool {
    COPILOT_MODELS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_in_model_list() {
        assert!(is_known_model("gemini-3-pro-preview"));
    }

    #[test]
    fn claude_models_in_list() {
        assert!(is_known_model("claude-sonnet-4.5"));
        assert!(is_known_model("claude-opus-4.6"));
    }

    #[test]
    fn gpt_models_in_list() {
        assert!(is_known_model("gpt-5-mini"));
    }

    #[test]
    fn defaults_are_listed() {
        assert!(is_known_model(DEFAULT_CLI_MODEL));
        assert!(is_known_model(DEFAULT_SDK_MODEL));
        assert!(!is_known_model("gpt-4o"));
    }
}
