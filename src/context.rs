//! Context-window sizing per model family.

use crate::config::EngineSettings;

/// Families whose common tags ship with a larger window than the default.
const BUILTIN_CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("deepseek-r1", 32768),
    ("gemma3", 32768),
    ("llama3.1", 32768),
    ("llama3.2", 32768),
    ("llama3.3", 32768),
    ("mistral-nemo", 32768),
    ("phi3", 4096),
    ("qwen2.5", 32768),
    ("qwen3", 32768),
];

/// Context window to request for `model`.
///
/// Matching ignores the registry namespace and the `:tag` suffix, then picks
/// the longest family prefix. Configured entries shadow built-in ones.
pub fn context_window_for(settings: &EngineSettings, model: &str) -> u32 {
    let family = model_family(model);

    longest_prefix(
        settings
            .context_windows
            .iter()
            .map(|(key, window)| (key.as_str(), *window)),
        &family,
    )
    .or_else(|| longest_prefix(BUILTIN_CONTEXT_WINDOWS.iter().copied(), &family))
    .unwrap_or(settings.default_context_window)
}

fn model_family(model: &str) -> String {
    let name = model.rsplit('/').next().unwrap_or(model);
    let name = name.split(':').next().unwrap_or(name);
    name.trim().to_ascii_lowercase()
}

fn longest_prefix<'a>(table: impl Iterator<Item = (&'a str, u32)>, family: &str) -> Option<u32> {
    table
        .filter(|(key, _)| !key.is_empty() && family.starts_with(&key.to_ascii_lowercase()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, window)| window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_models_use_default() {
        let settings = EngineSettings::default();
        assert_eq!(context_window_for(&settings, "m1"), 8192);
        assert_eq!(context_window_for(&settings, "llama3:8b"), 8192);
    }

    #[test]
    fn builtin_families_match_by_longest_prefix() {
        let settings = EngineSettings::default();
        assert_eq!(context_window_for(&settings, "llama3.1:70b"), 32768);
        assert_eq!(context_window_for(&settings, "library/qwen2.5-coder:7b"), 32768);
        assert_eq!(context_window_for(&settings, "phi3:mini"), 4096);
    }

    #[test]
    fn configured_windows_shadow_builtins() {
        let mut settings = EngineSettings::default();
        settings.context_windows.insert("llama3.1".to_string(), 65536);
        settings.context_windows.insert("m".to_string(), 2048);
        settings.default_context_window = 4096;

        assert_eq!(context_window_for(&settings, "llama3.1:8b"), 65536);
        assert_eq!(context_window_for(&settings, "m1"), 2048);
        assert_eq!(context_window_for(&settings, "gemma2"), 4096);
    }
}
