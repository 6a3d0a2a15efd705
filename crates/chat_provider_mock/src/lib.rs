//! Deterministic scripted implementation of the shared `chat_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and engine-level integration testing. Each `stream_chat` call
//! consumes the next scripted reply and records the request it was given.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chat_provider::{
    ChatChunk, ChatProvider, ChatRequest, ChatStream, CompletionStats, ProviderError,
    ProviderFuture, ToolCall,
};
use futures_util::stream;
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One scripted backend answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Stream these items in order. The script is responsible for ending with
    /// `Done` or an error.
    Stream(Vec<Result<ChatChunk, ProviderError>>),
    /// Fail while opening the stream.
    Reject(ProviderError),
}

impl ScriptedReply {
    /// Text split into the given parts, followed by a terminal chunk.
    #[must_use]
    pub fn text<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<_> = parts
            .into_iter()
            .map(|part| Ok(ChatChunk::Content(part.into())))
            .collect();
        items.push(Ok(done()));
        Self::Stream(items)
    }

    /// Reasoning trace followed by answer text.
    #[must_use]
    pub fn thinking_then_text(thinking: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Stream(vec![
            Ok(ChatChunk::Thinking(thinking.into())),
            Ok(ChatChunk::Content(text.into())),
            Ok(done()),
        ])
    }

    /// A single tool call with no accompanying text.
    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::tool_calls(vec![ToolCall::new(name, arguments)])
    }

    #[must_use]
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Stream(vec![Ok(ChatChunk::ToolCalls(calls)), Ok(done())])
    }

    /// Partial text, then the connection drops before the terminal chunk.
    #[must_use]
    pub fn interrupted<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<_> = parts
            .into_iter()
            .map(|part| Ok(ChatChunk::Content(part.into())))
            .collect();
        items.push(Err(ProviderError::Interrupted(
            "scripted connection reset".to_string(),
        )));
        Self::Stream(items)
    }

    /// The backend refuses the request.
    #[must_use]
    pub fn failure(error: ProviderError) -> Self {
        Self::Reject(error)
    }
}

fn done() -> ChatChunk {
    ChatChunk::Done(CompletionStats {
        done_reason: Some("stop".to_string()),
        ..CompletionStats::default()
    })
}

/// Deterministic provider that replays scripted replies in order.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply after the existing script.
    pub fn push(&self, reply: ScriptedReply) {
        lock_unpoisoned(&self.replies).push_back(reply);
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.replies).len()
    }
}

impl ChatProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> ProviderFuture<'_, Result<ChatStream, ProviderError>> {
        lock_unpoisoned(&self.requests).push(request);
        let reply = lock_unpoisoned(&self.replies).pop_front();

        Box::pin(async move {
            match reply {
                Some(ScriptedReply::Stream(items)) => Ok(Box::pin(stream::iter(items)) as ChatStream),
                Some(ScriptedReply::Reject(error)) => Err(error),
                None => Err(ProviderError::Backend(
                    "scripted provider has no replies left".to_string(),
                )),
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

#[cfg(test)]
mod tests {
    use chat_provider::{ChatMessage, GenerationOptions};
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
            options: GenerationOptions::default(),
        }
    }

    async fn drain(provider: &ScriptedProvider, model: &str) -> Vec<Result<ChatChunk, ProviderError>> {
        provider
            .stream_chat(request(model))
            .await
            .expect("scripted stream should open")
            .collect()
            .await
    }

    #[tokio::test]
    async fn replies_are_consumed_in_order_and_requests_recorded() {
        let provider = ScriptedProvider::new([
            ScriptedReply::text(["Hel", "lo"]),
            ScriptedReply::tool_call("list_files", json!({"path": "."})),
        ]);

        let first = drain(&provider, "m1").await;
        let second = drain(&provider, "m2").await;

        assert_eq!(first.len(), 3);
        assert_eq!(first[1], Ok(ChatChunk::Content("lo".to_string())));
        assert!(matches!(second[0], Ok(ChatChunk::ToolCalls(ref calls)) if calls[0].name == "list_files"));
        assert_eq!(provider.remaining(), 0);

        let models: Vec<_> = provider.requests().into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_script_rejects_request() {
        let provider = ScriptedProvider::default();
        let error = provider
            .stream_chat(request("m1"))
            .await
            .err()
            .expect("empty script should fail");
        assert!(matches!(error, ProviderError::Backend(_)));
    }

    #[tokio::test]
    async fn interrupted_reply_ends_with_error() {
        let provider = ScriptedProvider::new([ScriptedReply::interrupted(["par"])]);
        let chunks = drain(&provider, "m1").await;
        assert!(matches!(chunks.last(), Some(Err(ProviderError::Interrupted(_)))));
    }

    #[tokio::test]
    async fn failure_reply_rejects_open() {
        let provider = ScriptedProvider::new([ScriptedReply::failure(ProviderError::Status {
            status: 503,
            message: "loading".to_string(),
        })]);
        assert!(provider.stream_chat(request("m1")).await.is_err());
    }
}
