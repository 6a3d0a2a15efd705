//! Backend-API implementation of the shared `chat_provider` contract.
//!
//! This adapter translates provider-neutral requests into `ollama_api` wire
//! payloads and maps decoded NDJSON events back into [`ChatChunk`] values.

use std::sync::Arc;
use std::time::Duration;

use chat_provider::{
    ChatChunk, ChatMessage, ChatProvider, ChatRequest, ChatStream, CompletionStats,
    GenerationOptions, ProviderError, ProviderFuture, ProviderInitError, ToolCall,
    ToolDefinition,
};
use futures_util::StreamExt;
use ollama_api::{
    OllamaApiClient, OllamaApiConfig, OllamaApiError, OllamaChatRequest, OllamaDoneStats,
    OllamaEventStream, OllamaMessage, OllamaOptions, OllamaStreamEvent, OllamaTool,
    OllamaToolCall,
};
use serde_json::Value;

/// Stable provider identifier used in logs and startup selection.
pub const OLLAMA_PROVIDER_ID: &str = "ollama";

/// Runtime configuration for the backend provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OllamaProviderConfig {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl OllamaProviderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_api_config(self) -> OllamaApiConfig {
        let mut config = OllamaApiConfig::default();

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

trait EventSource: Send + Sync {
    fn open(
        &self,
        request: OllamaChatRequest,
    ) -> ProviderFuture<'_, Result<OllamaEventStream, OllamaApiError>>;
}

#[derive(Debug)]
struct DefaultEventSource {
    client: OllamaApiClient,
}

impl EventSource for DefaultEventSource {
    fn open(
        &self,
        request: OllamaChatRequest,
    ) -> ProviderFuture<'_, Result<OllamaEventStream, OllamaApiError>> {
        Box::pin(async move { self.client.stream(&request).await })
    }
}

/// `ChatProvider` adapter backed by `ollama_api` transport primitives.
pub struct OllamaProvider {
    events: Arc<dyn EventSource>,
}

impl OllamaProvider {
    /// Creates a provider using real HTTP transport.
    pub fn new(config: OllamaProviderConfig) -> Result<Self, ProviderInitError> {
        let client = OllamaApiClient::new(config.into_api_config()).map_err(map_init_error)?;
        tracing::debug!(endpoint = %client.normalized_endpoint(), "chat provider ready");

        Ok(Self {
            events: Arc::new(DefaultEventSource { client }),
        })
    }

    #[cfg(test)]
    fn with_event_source_for_tests(events: Arc<dyn EventSource>) -> Self {
        Self { events }
    }
}

impl ChatProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        OLLAMA_PROVIDER_ID
    }

    fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> ProviderFuture<'_, Result<ChatStream, ProviderError>> {
        Box::pin(async move {
            let model = request.model.clone();
            tracing::debug!(
                model = %model,
                messages = request.messages.len(),
                tools = request.tools.len(),
                "opening chat stream"
            );

            let events = self
                .events
                .open(to_wire_request(request))
                .await
                .map_err(map_stream_error)?;

            let chunks = events.map(move |event| match event {
                Ok(event) => Ok(map_event(&model, event)),
                Err(error) => Err(map_stream_error(error)),
            });
            Ok(Box::pin(chunks) as ChatStream)
        })
    }
}

fn to_wire_request(request: ChatRequest) -> OllamaChatRequest {
    let messages = request.messages.into_iter().map(to_wire_message).collect();
    let tools = request.tools.into_iter().map(to_wire_tool).collect();

    OllamaChatRequest::new(request.model, messages)
        .with_tools(tools)
        .with_options(to_wire_options(request.options))
}

fn to_wire_message(message: ChatMessage) -> OllamaMessage {
    let mut wire = OllamaMessage::new(message.role.as_str(), message.content);
    wire.tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| OllamaToolCall::new(call.name, call.arguments))
        .collect();
    wire.tool_name = message.tool_name;
    wire
}

fn to_wire_tool(tool: ToolDefinition) -> OllamaTool {
    OllamaTool::function(tool.name, tool.description, tool.parameters)
}

fn to_wire_options(options: GenerationOptions) -> OllamaOptions {
    OllamaOptions {
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        repeat_penalty: options.repeat_penalty,
        num_ctx: options.num_ctx,
        seed: options.seed,
    }
}

fn map_event(model: &str, event: OllamaStreamEvent) -> ChatChunk {
    match event {
        OllamaStreamEvent::ContentDelta(text) => ChatChunk::Content(text),
        OllamaStreamEvent::ThinkingDelta(text) => ChatChunk::Thinking(text),
        OllamaStreamEvent::ToolCalls(calls) => ChatChunk::ToolCalls(
            calls
                .into_iter()
                .map(|call| {
                    ToolCall::new(
                        call.function.name,
                        normalize_arguments(call.function.arguments),
                    )
                })
                .collect(),
        ),
        OllamaStreamEvent::Done(stats) => {
            log_completion(model, &stats);
            ChatChunk::Done(CompletionStats {
                done_reason: stats.done_reason,
                prompt_tokens: stats.prompt_eval_count,
                completion_tokens: stats.eval_count,
            })
        }
    }
}

// Some models omit arguments entirely for parameterless tools.
fn normalize_arguments(arguments: Value) -> Value {
    if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    }
}

fn log_completion(model: &str, stats: &OllamaDoneStats) {
    tracing::debug!(
        model = %model,
        done_reason = stats.done_reason.as_deref().unwrap_or("unknown"),
        prompt_tokens = stats.prompt_eval_count,
        completion_tokens = stats.eval_count,
        "chat stream completed"
    );
}

fn map_stream_error(error: OllamaApiError) -> ProviderError {
    match error {
        OllamaApiError::Status(status, message) => ProviderError::Status {
            status: status.as_u16(),
            message,
        },
        OllamaApiError::StreamInterrupted(message) => ProviderError::Interrupted(message),
        OllamaApiError::StreamFailed(message) => ProviderError::Backend(message),
        OllamaApiError::MalformedChunk(message) => ProviderError::Malformed(message),
        OllamaApiError::Serde(error) => ProviderError::Malformed(error.to_string()),
        other => ProviderError::Transport(other.to_string()),
    }
}

fn map_init_error(error: OllamaApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize ollama provider: {error}"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard};

    use chat_provider::Role;
    use futures_util::stream;
    use ollama_api::decode_event_stream;
    use serde_json::json;

    use super::*;

    enum FakeOutcome {
        Body(&'static str),
        Error(OllamaApiError),
    }

    struct FakeEventSource {
        observed: Mutex<Option<OllamaChatRequest>>,
        outcome: Mutex<Option<FakeOutcome>>,
    }

    impl FakeEventSource {
        fn body(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                observed: Mutex::new(None),
                outcome: Mutex::new(Some(FakeOutcome::Body(body))),
            })
        }

        fn failure(error: OllamaApiError) -> Arc<Self> {
            Arc::new(Self {
                observed: Mutex::new(None),
                outcome: Mutex::new(Some(FakeOutcome::Error(error))),
            })
        }

        fn observed(&self) -> Option<OllamaChatRequest> {
            lock_unpoisoned(&self.observed).clone()
        }
    }

    impl EventSource for FakeEventSource {
        fn open(
            &self,
            request: OllamaChatRequest,
        ) -> ProviderFuture<'_, Result<OllamaEventStream, OllamaApiError>> {
            *lock_unpoisoned(&self.observed) = Some(request);
            let outcome = lock_unpoisoned(&self.outcome).take();
            Box::pin(async move {
                match outcome {
                    Some(FakeOutcome::Body(body)) => Ok(decode_event_stream(stream::iter(vec![
                        Ok::<_, OllamaApiError>(body.as_bytes().to_vec()),
                    ]))),
                    Some(FakeOutcome::Error(error)) => Err(error),
                    None => panic!("fake outcome should be consumed exactly once"),
                }
            })
        }
    }

    fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m1".to_string(),
            messages: vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("hello"),
            ],
            tools: vec![ToolDefinition {
                name: "list_files".to_string(),
                description: "List a directory".to_string(),
                parameters: json!({"type": "object"}),
            }],
            options: GenerationOptions {
                temperature: Some(0.3),
                num_ctx: Some(8192),
                ..GenerationOptions::default()
            },
        }
    }

    async fn collect(provider: &OllamaProvider) -> Vec<Result<ChatChunk, ProviderError>> {
        provider
            .stream_chat(request())
            .await
            .expect("stream should open")
            .collect()
            .await
    }

    #[test]
    fn provider_reports_stable_id() {
        let provider = OllamaProvider::new(OllamaProviderConfig::new()).expect("provider");
        assert_eq!(provider.provider_id(), OLLAMA_PROVIDER_ID);
    }

    #[test]
    fn invalid_base_url_fails_initialization() {
        let error = OllamaProvider::new(OllamaProviderConfig::new().with_base_url("::"))
            .err()
            .expect("invalid URL should fail");
        assert!(error.message().contains("ollama provider"));
    }

    #[tokio::test]
    async fn stream_maps_events_to_chunks() {
        let source = FakeEventSource::body(concat!(
            "{\"message\":{\"content\":\"\",\"thinking\":\"plan\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":5,\"eval_count\":1}\n"
        ));
        let provider = OllamaProvider::with_event_source_for_tests(
            Arc::clone(&source) as Arc<dyn EventSource>
        );

        let chunks = collect(&provider).await;

        assert_eq!(
            chunks,
            vec![
                Ok(ChatChunk::Thinking("plan".to_string())),
                Ok(ChatChunk::Content("Hi".to_string())),
                Ok(ChatChunk::Done(CompletionStats {
                    done_reason: Some("stop".to_string()),
                    prompt_tokens: Some(5),
                    completion_tokens: Some(1),
                })),
            ]
        );

        let observed = source.observed().expect("request should be observed");
        assert_eq!(observed.model, "m1");
        assert_eq!(observed.messages[0].role, Role::System.as_str());
        assert_eq!(observed.tools[0].function.name, "list_files");
        assert_eq!(observed.options.num_ctx, Some(8192));
        assert_eq!(observed.options.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn stream_maps_tool_calls_and_fills_missing_arguments() {
        let source = FakeEventSource::body(concat!(
            "{\"message\":{\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"git_status\"}}]},\"done\":false}\n",
            "{\"done\":true}\n"
        ));
        let provider = OllamaProvider::with_event_source_for_tests(source);

        let chunks = collect(&provider).await;

        assert_eq!(
            chunks[0],
            Ok(ChatChunk::ToolCalls(vec![ToolCall::new("git_status", json!({}))]))
        );
    }

    #[tokio::test]
    async fn interrupted_stream_surfaces_interrupted_error() {
        let source = FakeEventSource::body("{\"message\":{\"content\":\"par\"},\"done\":false}\n");
        let provider = OllamaProvider::with_event_source_for_tests(source);

        let chunks = collect(&provider).await;

        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], Err(ProviderError::Interrupted(_))));
    }

    #[tokio::test]
    async fn malformed_line_surfaces_malformed_error() {
        let source = FakeEventSource::body("{\"message\":\n");
        let provider = OllamaProvider::with_event_source_for_tests(source);

        let chunks = collect(&provider).await;

        assert!(matches!(chunks[0], Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn open_failure_maps_to_provider_error() {
        let source = FakeEventSource::failure(OllamaApiError::StreamFailed("no gpu".to_string()));
        let provider = OllamaProvider::with_event_source_for_tests(source);

        let error = provider
            .stream_chat(request())
            .await
            .err()
            .expect("open should fail");
        assert_eq!(error, ProviderError::Backend("no gpu".to_string()));
    }
}
