use chat_provider::{ChatMessage, Role, ToolCall};
use session_store::{MessageRecord, NewMessage};

/// One entry of the engine's in-memory history.
///
/// `id` is the storage row id once the message has been saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<i64>,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub model: Option<String>,
    pub preset_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::unsaved(Role::User, content.into())
    }

    pub(crate) fn assistant(
        content: String,
        thinking: String,
        tool_calls: Vec<ToolCall>,
        model: &str,
        preset_id: Option<&str>,
    ) -> Self {
        Self {
            thinking: (!thinking.is_empty()).then_some(thinking),
            model: Some(model.to_string()),
            preset_id: preset_id.map(str::to_string),
            tool_calls,
            ..Self::unsaved(Role::Assistant, content)
        }
    }

    pub(crate) fn tool(tool_name: &str, content: String) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            ..Self::unsaved(Role::Tool, content)
        }
    }

    fn unsaved(role: Role, content: String) -> Self {
        Self {
            id: None,
            role,
            content,
            thinking: None,
            model: None,
            preset_id: None,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// True for a final answer, as opposed to a tool-requesting step.
    pub fn is_answer(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_name: self.tool_name.clone(),
        }
    }

    pub(crate) fn to_new_message(&self) -> NewMessage {
        NewMessage {
            role: self.role,
            content: self.content.clone(),
            thinking: self.thinking.clone(),
            model: self.model.clone(),
            preset_id: self.preset_id.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_name: self.tool_name.clone(),
        }
    }
}

impl From<ChatMessage> for Message {
    fn from(message: ChatMessage) -> Self {
        Self {
            tool_calls: message.tool_calls,
            tool_name: message.tool_name,
            ..Self::unsaved(message.role, message.content)
        }
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: Some(record.id),
            role: record.role,
            content: record.content,
            thinking: record.thinking,
            model: record.model,
            preset_id: record.preset_id,
            tool_calls: record.tool_calls,
            tool_name: record.tool_name,
        }
    }
}
