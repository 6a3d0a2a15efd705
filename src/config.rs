//! Engine settings: compiled-in defaults, an optional JSON file, and
//! environment overrides.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_provider::GenerationOptions;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG_PATH";
pub const OLLAMA_URL_ENV: &str = "PARLEY_OLLAMA_URL";

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_CONTEXT_WINDOW: u32 = 8192;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub base_url: String,
    pub timeout: Duration,
    /// `None` keeps sessions in an in-memory database.
    pub database_path: Option<PathBuf>,
    pub system_prompt_path: Option<PathBuf>,
    pub default_context_window: u32,
    /// Per-model-family context window overrides, keyed by family prefix.
    pub context_windows: BTreeMap<String, u32>,
    pub max_tool_rounds: usize,
    pub autosave: bool,
    pub presets: BTreeMap<String, GenerationOptions>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            database_path: None,
            system_prompt_path: None,
            default_context_window: DEFAULT_CONTEXT_WINDOW,
            context_windows: BTreeMap::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            autosave: true,
            presets: BTreeMap::new(),
        }
    }
}

/// On-disk shape. Every field is optional; unknown fields are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    timeout_sec: Option<u64>,
    database_path: Option<PathBuf>,
    system_prompt_path: Option<PathBuf>,
    default_context_window: Option<u32>,
    #[serde(default)]
    context_windows: BTreeMap<String, u32>,
    max_tool_rounds: Option<usize>,
    autosave: Option<bool>,
    #[serde(default)]
    presets: BTreeMap<String, GenerationOptions>,
}

impl EngineSettings {
    /// Reads `PARLEY_CONFIG_PATH` (if set) and applies `PARLEY_OLLAMA_URL`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match env_string_opt(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(base_url) = env_string_opt(OLLAMA_URL_ENV) {
            settings.base_url = base_url;
        }
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let file: FileConfig = serde_json::from_str(text)?;
        let defaults = Self::default();

        Ok(Self {
            base_url: file
                .base_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.base_url),
            timeout: file
                .timeout_sec
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            database_path: file.database_path,
            system_prompt_path: file.system_prompt_path,
            default_context_window: file
                .default_context_window
                .unwrap_or(defaults.default_context_window),
            context_windows: file.context_windows,
            max_tool_rounds: file.max_tool_rounds.unwrap_or(defaults.max_tool_rounds),
            autosave: file.autosave.unwrap_or(defaults.autosave),
            presets: file.presets,
        })
    }

    pub fn preset(&self, preset_id: &str) -> Option<&GenerationOptions> {
        self.presets.get(preset_id)
    }
}

pub(crate) fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn defaults_apply_without_environment() {
        let _lock = env_lock();
        let _g1 = set_env_guard(CONFIG_PATH_ENV, None);
        let _g2 = set_env_guard(OLLAMA_URL_ENV, None);

        let settings = EngineSettings::load().expect("defaults should load");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.base_url, "http://localhost:11434");
        assert_eq!(settings.default_context_window, 8192);
        assert_eq!(settings.max_tool_rounds, 8);
        assert!(settings.autosave);
    }

    #[test]
    fn config_file_and_url_override_are_applied() {
        let _lock = env_lock();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parley.json");
        fs::write(
            &path,
            r#"{
                "timeout_sec": 30,
                "database_path": "/var/lib/parley/parley.db",
                "context_windows": { "llama3.1": 32768 },
                "max_tool_rounds": 3,
                "autosave": false,
                "presets": { "precise": { "temperature": 0.1, "top_p": 0.8 } }
            }"#,
        )
        .expect("write config");
        let path_text = path.to_string_lossy().into_owned();
        let _g1 = set_env_guard(CONFIG_PATH_ENV, Some(&path_text));
        let _g2 = set_env_guard(OLLAMA_URL_ENV, Some(" http://gpu-box:11434 "));

        let settings = EngineSettings::load().expect("config should load");
        assert_eq!(settings.base_url, "http://gpu-box:11434");
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(
            settings.database_path.as_deref(),
            Some(Path::new("/var/lib/parley/parley.db"))
        );
        assert_eq!(settings.context_windows.get("llama3.1"), Some(&32768));
        assert_eq!(settings.max_tool_rounds, 3);
        assert!(!settings.autosave);
        assert_eq!(
            settings.preset("precise").and_then(|preset| preset.temperature),
            Some(0.1)
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(EngineSettings::from_json(r#"{ "base_uri": "x" }"#).is_err());
        assert!(EngineSettings::from_json(r#"{ "presets": { "p": { "mirostat": 2 } } }"#).is_err());
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let error = EngineSettings::from_file(Path::new("/definitely/missing/parley.json"))
            .expect_err("missing file");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
