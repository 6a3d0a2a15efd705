//! Pull-based driver for one generation.

use std::mem;

use chat_provider::{ChatChunk, ChatStream, CompletionStats, ProviderError, ToolCall};
use futures_util::StreamExt;

use crate::engine::ConversationEngine;
use crate::error::EngineError;
use crate::message::Message;

/// Item yielded by [`Turn::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// Everything the assistant has said so far in the current generation
    /// step. Cumulative, not a delta.
    Partial(String),
    /// Terminal value; nothing follows it.
    Complete(TurnOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Set once the session is durable.
    pub session_id: Option<i64>,
    pub full_content: String,
    pub thinking: Option<String>,
    pub model: String,
    pub stats: CompletionStats,
}

/// One in-flight `send` or `retry`.
///
/// The caller pulls updates with [`Turn::next`]. Dropping an unfinished
/// turn, or any error, discards what the turn produced: a plain send keeps
/// only its user message, a retry restores the answer it replaced.
pub struct Turn<'a> {
    engine: &'a mut ConversationEngine,
    stream: Option<ChatStream>,
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCall>,
    rounds: usize,
    /// History length right after the triggering user message.
    mark: usize,
    finished: bool,
}

impl<'a> Turn<'a> {
    pub(crate) fn new(engine: &'a mut ConversationEngine, mark: usize) -> Self {
        Self {
            engine,
            stream: None,
            content: String::new(),
            thinking: String::new(),
            tool_calls: Vec::new(),
            rounds: 0,
            mark,
            finished: false,
        }
    }

    /// Next update, or `None` once the turn has completed or failed.
    pub async fn next(&mut self) -> Option<Result<TurnUpdate, EngineError>> {
        if self.finished {
            return None;
        }

        let update = self.advance().await;
        if update.is_err() {
            self.abandon();
        }
        Some(update)
    }

    /// Drains the turn, returning its terminal value.
    pub async fn finish(mut self) -> Result<TurnOutcome, EngineError> {
        while let Some(update) = self.next().await {
            if let TurnUpdate::Complete(outcome) = update? {
                return Ok(outcome);
            }
        }
        Err(EngineError::Provider(ProviderError::Interrupted(
            "turn ended without a terminal value".to_string(),
        )))
    }

    async fn advance(&mut self) -> Result<TurnUpdate, EngineError> {
        loop {
            if self.stream.is_none() {
                let request = self.engine.build_request();
                tracing::debug!(
                    model = %request.model,
                    messages = request.messages.len(),
                    tools = request.tools.len(),
                    num_ctx = ?request.options.num_ctx,
                    round = self.rounds,
                    "opening completion"
                );
                let provider = self.engine.provider();
                self.stream = Some(provider.stream_chat(request).await?);
            }

            let Some(stream) = self.stream.as_mut() else {
                continue;
            };
            let chunk = match stream.next().await {
                Some(chunk) => chunk?,
                None => {
                    return Err(EngineError::Provider(ProviderError::Interrupted(
                        "stream ended before the terminal chunk".to_string(),
                    )))
                }
            };

            match chunk {
                ChatChunk::Content(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.content.push_str(&delta);
                    return Ok(TurnUpdate::Partial(self.content.clone()));
                }
                ChatChunk::Thinking(delta) => self.thinking.push_str(&delta),
                ChatChunk::ToolCalls(calls) => self.tool_calls.extend(calls),
                ChatChunk::Done(stats) => {
                    self.stream = None;
                    if self.tool_calls.is_empty() {
                        return self.complete(stats).await;
                    }
                    self.run_tool_round().await?;
                }
            }
        }
    }

    /// Records the requested calls, runs them, and appends one `tool`
    /// message per call before the next completion is opened.
    async fn run_tool_round(&mut self) -> Result<(), EngineError> {
        self.rounds += 1;
        let limit = self.engine.max_tool_rounds();
        if self.rounds > limit {
            return Err(EngineError::ToolLoopExceeded { limit });
        }

        let calls = mem::take(&mut self.tool_calls);
        let request_message = Message::assistant(
            mem::take(&mut self.content),
            mem::take(&mut self.thinking),
            calls.clone(),
            self.engine.model(),
            self.engine.preset_id(),
        );
        self.engine.enter_tool_round(request_message);

        for call in calls {
            let output = self.engine.run_tool(call.clone()).await;
            self.engine.push_tool_result(&call.name, output.content);
        }

        self.engine.resume_generation();
        Ok(())
    }

    async fn complete(&mut self, stats: CompletionStats) -> Result<TurnUpdate, EngineError> {
        let full_content = mem::take(&mut self.content);
        let thinking = mem::take(&mut self.thinking);
        let answer = Message::assistant(
            full_content.clone(),
            thinking.clone(),
            Vec::new(),
            self.engine.model(),
            self.engine.preset_id(),
        );

        tracing::debug!(
            done_reason = ?stats.done_reason,
            prompt_tokens = ?stats.prompt_tokens,
            completion_tokens = ?stats.completion_tokens,
            tool_rounds = self.rounds,
            "completion finished"
        );

        self.finished = true;
        let retry_pending = self.engine.finish_generation(answer);
        let session_id = if !retry_pending && self.engine.autosave() {
            Some(self.engine.save().await?)
        } else {
            self.engine.session_id()
        };

        Ok(TurnUpdate::Complete(TurnOutcome {
            session_id,
            full_content,
            thinking: (!thinking.is_empty()).then_some(thinking),
            model: self.engine.model().to_string(),
            stats,
        }))
    }

    fn abandon(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stream = None;
        self.engine.abort_generation(self.mark);
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}
