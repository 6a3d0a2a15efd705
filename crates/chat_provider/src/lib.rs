//! Minimal provider-agnostic contract for streaming one chat completion.
//!
//! This crate intentionally defines only the message, tool and chunk types
//! shared by the conversation engine and the inference backends it drives.
//! It excludes transport details, wire payloads, and multi-turn orchestration.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed future returned by [`ChatProvider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Live sequence of chunks for one completion. The stream ends after
/// [`ChatChunk::Done`] or after the first error.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, ProviderError>> + Send>>;

/// Speaker of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "system" => Self::System,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model-requested function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Model-facing history item sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Name of the tool whose result this `tool` message carries.
    pub tool_name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    #[must_use]
    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(tool_name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

/// Host-executed tool exposed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's argument object.
    pub parameters: Value,
}

/// Sampling parameters forwarded to the backend. Unset fields keep the
/// backend's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl GenerationOptions {
    /// Returns a copy whose context window is `num_ctx` unless one is
    /// already set explicitly.
    #[must_use]
    pub fn with_default_context(mut self, num_ctx: u32) -> Self {
        if self.num_ctx.is_none() {
            self.num_ctx = Some(num_ctx);
        }
        self
    }
}

/// Input required to open one streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub options: GenerationOptions,
}

/// Backend-reported accounting for one finished completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionStats {
    pub done_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Incremental unit decoded from a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Appended assistant text.
    Content(String),
    /// Appended reasoning-trace text.
    Thinking(String),
    /// Completed tool calls requested by the model.
    ToolCalls(Vec<ToolCall>),
    /// Terminal chunk; no further chunks follow.
    Done(CompletionStats),
}

impl ChatChunk {
    /// Returns true when this chunk terminates the completion.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Failure while opening or consuming a completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend could not be reached or the connection failed.
    Transport(String),
    /// The backend answered with a non-success HTTP status.
    Status { status: u16, message: String },
    /// The stream ended before the terminal chunk arrived.
    Interrupted(String),
    /// A chunk could not be decoded.
    Malformed(String),
    /// The backend reported an error inside the stream.
    Backend(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Interrupted(message) => write!(f, "stream interrupted: {message}"),
            Self::Malformed(message) => write!(f, "malformed stream chunk: {message}"),
            Self::Backend(message) => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Error returned while constructing/configuring a provider before any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Backend able to stream one chat completion.
///
/// Implementations must not retry internally: a failed request or an
/// interrupted stream is reported to the caller as a [`ProviderError`].
pub trait ChatProvider: Send + Sync + 'static {
    /// Stable identifier used in logs and startup selection.
    fn provider_id(&self) -> &str;

    /// Opens one completion. The returned stream is pulled by the caller;
    /// dropping it abandons the request.
    fn stream_chat(&self, request: ChatRequest)
        -> ProviderFuture<'_, Result<ChatStream, ProviderError>>;
}

#[cfg(test)]
mod tests {
    use futures_util::{stream, StreamExt};
    use serde_json::json;

    use super::*;

    struct EchoProvider;

    impl ChatProvider for EchoProvider {
        fn provider_id(&self) -> &str {
            "echo"
        }

        fn stream_chat(
            &self,
            request: ChatRequest,
        ) -> ProviderFuture<'_, Result<ChatStream, ProviderError>> {
            Box::pin(async move {
                let last = request
                    .messages
                    .last()
                    .map(|message| message.content.clone())
                    .unwrap_or_default();
                let chunks = vec![
                    Ok(ChatChunk::Content(last)),
                    Ok(ChatChunk::Done(CompletionStats::default())),
                ];
                Ok(Box::pin(stream::iter(chunks)) as ChatStream)
            })
        }
    }

    #[test]
    fn role_round_trips_through_wire_names() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("narrator"), None);
        assert_eq!(serde_json::to_value(Role::Tool).expect("role"), json!("tool"));
    }

    #[test]
    fn tool_message_constructor_records_tool_name() {
        let message = ChatMessage::tool("list_files", "src/");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_name.as_deref(), Some("list_files"));
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn generation_options_keep_explicit_context_window() {
        let explicit = GenerationOptions {
            num_ctx: Some(2048),
            ..GenerationOptions::default()
        };
        assert_eq!(explicit.with_default_context(8192).num_ctx, Some(2048));
        assert_eq!(
            GenerationOptions::default()
                .with_default_context(8192)
                .num_ctx,
            Some(8192)
        );
    }

    #[test]
    fn generation_options_reject_unknown_fields() {
        let parsed = serde_json::from_value::<GenerationOptions>(json!({
            "temperature": 0.2,
            "mirostat": 1
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn provider_error_display_names_failure_class() {
        let error = ProviderError::Status {
            status: 404,
            message: "model not found".to_string(),
        };
        assert_eq!(error.to_string(), "HTTP 404: model not found");
        assert!(ProviderError::Interrupted("eof".to_string())
            .to_string()
            .contains("interrupted"));
    }

    #[test]
    fn provider_init_error_preserves_message() {
        let error = ProviderInitError::new("missing base url");
        assert_eq!(error.message(), "missing base url");
        assert_eq!(error.to_string(), "missing base url");
    }

    #[tokio::test]
    async fn provider_streams_chunks_until_done() {
        let provider = EchoProvider;
        let request = ChatRequest {
            model: "echo".to_string(),
            messages: vec![ChatMessage::user("ping")],
            tools: Vec::new(),
            options: GenerationOptions::default(),
        };

        let chunks: Vec<_> = provider
            .stream_chat(request)
            .await
            .expect("stream should open")
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Ok(ChatChunk::Content("ping".to_string())));
        assert!(chunks[1].as_ref().is_ok_and(ChatChunk::is_terminal));
    }
}
