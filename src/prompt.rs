//! Default instruction text for new sessions.

use std::fs;
use std::path::Path;

use crate::config::{env_string_opt, EngineSettings};

pub const SYSTEM_PROMPT_ENV: &str = "PARLEY_SYSTEM_PROMPT";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running on the user's own \
machine. Answer accurately and concisely. When tools are available, inspect the project with \
them instead of guessing, and say plainly when a tool reports an error.";

/// Instruction text for a session started without an explicit prompt.
///
/// `PARLEY_SYSTEM_PROMPT` wins, then the configured prompt file. A file
/// that cannot be read falls back to [`DEFAULT_SYSTEM_PROMPT`].
pub fn default_system_prompt(settings: &EngineSettings) -> String {
    resolve_prompt(
        env_string_opt(SYSTEM_PROMPT_ENV),
        settings.system_prompt_path.as_deref(),
    )
}

fn resolve_prompt(override_text: Option<String>, path: Option<&Path>) -> String {
    if let Some(text) = override_text {
        return text;
    }

    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };

    match fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "system prompt file is empty; using built-in prompt");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "system prompt file unreadable; using built-in prompt");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Appends a project outline so the model knows which paths exist.
pub fn with_file_tree(prompt: &str, tree: &str) -> String {
    format!(
        "{prompt}\n\nYou can call tools on the project below. Paths are relative to its root.\n\n{}",
        tree.trim_end()
    )
}
