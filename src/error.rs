use chat_provider::ProviderError;
use session_store::SessionStoreError;
use thiserror::Error;
use tool_sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a generation is already in progress")]
    Busy,
    #[error("a retried answer is waiting to be accepted or rejected")]
    RetryDecisionPending,
    #[error("no retried answer is waiting for a decision")]
    NoRetryPending,
    #[error("message text must not be empty")]
    EmptyMessage,
    #[error("conversation has no assistant message to retry")]
    NoAssistantMessage,
    #[error("conversation has no user message before the last answer")]
    NoUserMessage,
    /// The history ends in a user message that never got an answer, usually
    /// after a failed send. Roll it back before retrying.
    #[error("last user message has no answer; roll it back before retrying")]
    UnansweredUserMessage,
    #[error("invalid turn number {input:?}: expected a non-negative integer")]
    InvalidTurnNumber { input: String },
    #[error("unknown parameter preset {0:?}")]
    UnknownPreset(String),
    #[error("model was still requesting tools after {limit} rounds")]
    ToolLoopExceeded { limit: usize },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl EngineError {
    /// True for a missing session and for one owned by someone else.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_not_found())
    }
}
