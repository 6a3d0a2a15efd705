use chat_provider::{ChatMessage, Role, ToolCall};
use time::OffsetDateTime;

/// Session row to insert on first save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    pub model: String,
    pub title: Option<String>,
    pub project_root: Option<String>,
    /// Instruction text in effect at creation; never recomputed afterwards.
    pub system_prompt: Option<String>,
    pub preset_id: Option<String>,
    pub owner: Option<String>,
}

/// Message row to insert. Plaintext fields are sealed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub model: Option<String>,
    pub preset_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_name: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
            model: None,
            preset_id: None,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: i64,
    /// Ids of the inserted messages, in input order.
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: i64,
    pub model: String,
    pub title: Option<String>,
    pub project_root: Option<String>,
    pub system_prompt: Option<String>,
    pub preset_id: Option<String>,
    pub owner: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Decrypted message row.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub model: Option<String>,
    pub preset_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_name: Option<String>,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl MessageRecord {
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_name: self.tool_name.clone(),
        }
    }
}

/// A session with its live messages in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWithMessages {
    pub session: SessionRecord,
    pub messages: Vec<MessageRecord>,
}

impl SessionWithMessages {
    /// Model-facing transcript: the system-prompt snapshot (when present)
    /// followed by every live message.
    #[must_use]
    pub fn transcript(&self) -> Vec<ChatMessage> {
        let snapshot = self
            .session
            .system_prompt
            .as_deref()
            .map(ChatMessage::system);
        snapshot
            .into_iter()
            .chain(self.messages.iter().map(MessageRecord::to_chat_message))
            .collect()
    }
}

/// Listing row; carries no message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: i64,
    pub title: Option<String>,
    pub model: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
