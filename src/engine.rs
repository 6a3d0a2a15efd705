//! Stateful conversation over one session.

use std::path::PathBuf;
use std::sync::Arc;

use chat_provider::{ChatMessage, ChatProvider, ChatRequest, Role, ToolCall};
use session_store::{NewMessage, NewSession, SessionRecord};
use tool_sandbox::{ToolExecutor, ToolOutput, ToolSandbox, DEFAULT_TREE_DEPTH};

use crate::context::context_window_for;
use crate::error::EngineError;
use crate::message::Message;
use crate::prompt::{default_system_prompt, with_file_tree};
use crate::services::Services;
use crate::state::{EngineState, Phase, RetrySnapshot};
use crate::turn::Turn;

/// Inputs for [`ConversationEngine::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub model: String,
    /// Prior messages. A leading `system` message is used as the session's
    /// instruction text.
    pub history: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    /// Activates the tool sandbox on this directory.
    pub tool_root: Option<PathBuf>,
    pub preset_id: Option<String>,
    pub owner: Option<String>,
}

impl StartOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tool_root = Some(root.into());
        self
    }

    pub fn with_preset(mut self, preset_id: impl Into<String>) -> Self {
        self.preset_id = Some(preset_id.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Model and preset overrides for [`ConversationEngine::retry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOptions {
    pub model: Option<String>,
    pub preset_id: Option<String>,
}

impl RetryOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            preset_id: None,
        }
    }

    pub fn with_preset(mut self, preset_id: impl Into<String>) -> Self {
        self.preset_id = Some(preset_id.into());
        self
    }
}

/// One conversation: its in-memory history, the active model and preset,
/// the optional tool sandbox, and the link to its stored session.
///
/// An engine runs one generation at a time; [`Turn`] borrows it mutably
/// for the duration.
pub struct ConversationEngine {
    services: Services,
    owner: Option<String>,
    session_id: Option<i64>,
    model: String,
    preset_id: Option<String>,
    system_prompt: Option<String>,
    project_root: Option<PathBuf>,
    tools: Option<Arc<dyn ToolExecutor>>,
    /// History after the system prompt, in insertion order.
    messages: Vec<Message>,
    /// Count of leading `messages` already written to the store.
    saved_len: usize,
    state: EngineState,
}

impl ConversationEngine {
    pub fn start(services: Services, options: StartOptions) -> Result<Self, EngineError> {
        if let Some(preset_id) = options.preset_id.as_deref() {
            ensure_known_preset(&services, preset_id)?;
        }

        let mut history = options.history.into_iter().peekable();
        let existing_prompt = history
            .next_if(|message| message.role == Role::System)
            .map(|message| message.content);

        let sandbox = options
            .tool_root
            .as_ref()
            .map(ToolSandbox::new)
            .transpose()?;

        let system_prompt = match existing_prompt {
            Some(prompt) => prompt,
            None => {
                let base = options
                    .system_prompt
                    .unwrap_or_else(|| default_system_prompt(&services.settings));
                match sandbox.as_ref() {
                    Some(sandbox) => {
                        with_file_tree(&base, &sandbox.file_tree_summary(DEFAULT_TREE_DEPTH))
                    }
                    None => base,
                }
            }
        };

        let project_root = sandbox.as_ref().map(|sandbox| sandbox.root().to_path_buf());
        tracing::debug!(
            model = %options.model,
            tools = sandbox.is_some(),
            "conversation started"
        );

        Ok(Self {
            services,
            owner: options.owner,
            session_id: None,
            model: options.model,
            preset_id: options.preset_id,
            system_prompt: Some(system_prompt),
            project_root,
            tools: sandbox.map(|sandbox| Arc::new(sandbox) as Arc<dyn ToolExecutor>),
            messages: history.map(Message::from).collect(),
            saved_len: 0,
            state: EngineState::Idle,
        })
    }

    /// Rebuilds an engine from a stored session. The stored instruction
    /// snapshot is reused verbatim and the sandbox is re-opened on the
    /// recorded project root; a root that has gone missing disables tools.
    pub async fn resume(
        services: Services,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<Self, EngineError> {
        let stored = services.store.fetch_session(session_id, owner).await?;
        let SessionRecord {
            id,
            model,
            system_prompt,
            preset_id,
            project_root,
            ..
        } = stored.session;

        let sandbox = project_root.as_deref().and_then(|root| match ToolSandbox::new(root) {
            Ok(sandbox) => Some(sandbox),
            Err(error) => {
                tracing::warn!(session_id = id, %error, "project root unavailable; tools disabled");
                None
            }
        });
        let messages: Vec<Message> = stored.messages.into_iter().map(Message::from).collect();
        tracing::info!(session_id = id, messages = messages.len(), "session resumed");

        Ok(Self {
            services,
            owner: owner.map(str::to_string),
            session_id: Some(id),
            model,
            preset_id,
            system_prompt,
            project_root: project_root.map(PathBuf::from),
            tools: sandbox.map(|sandbox| Arc::new(sandbox) as Arc<dyn ToolExecutor>),
            saved_len: messages.len(),
            messages,
            state: EngineState::Idle,
        })
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn preset_id(&self) -> Option<&str> {
        self.preset_id.as_deref()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn project_root(&self) -> Option<&std::path::Path> {
        self.project_root.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// History after the system prompt.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of user messages in the live history.
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|message| message.is_user()).count()
    }

    /// Messages not yet written to the store.
    pub fn unsaved_count(&self) -> usize {
        self.messages.len() - self.saved_len
    }

    /// Model-facing history: the system prompt followed by every message.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.system_prompt
            .as_deref()
            .map(ChatMessage::system)
            .into_iter()
            .chain(self.messages.iter().map(Message::to_chat_message))
            .collect()
    }

    /// Appends `text` as a user message and starts generating the answer.
    pub fn send(&mut self, text: impl Into<String>) -> Result<Turn<'_>, EngineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EngineError::EmptyMessage);
        }

        self.state.begin_generation(None)?;
        self.messages.push(Message::user(text));
        let mark = self.messages.len();
        Ok(Turn::new(self, mark))
    }

    /// Regenerates the most recent answer, optionally under another model or
    /// preset. A trailing unanswered user message must be removed first with
    /// [`rollback_pending_user_message`](Self::rollback_pending_user_message).
    /// The replaced turn is held aside until
    /// [`accept_retry`](Self::accept_retry) or
    /// [`reject_retry`](Self::reject_retry).
    pub fn retry(&mut self, options: RetryOptions) -> Result<Turn<'_>, EngineError> {
        self.state.ensure_idle()?;
        if let Some(preset_id) = options.preset_id.as_deref() {
            ensure_known_preset(&self.services, preset_id)?;
        }

        if self.messages.last().is_some_and(Message::is_user) {
            return Err(EngineError::UnansweredUserMessage);
        }
        let last_answer = self
            .messages
            .iter()
            .rposition(Message::is_answer)
            .ok_or(EngineError::NoAssistantMessage)?;
        let cut = self.messages[..last_answer]
            .iter()
            .rposition(Message::is_user)
            .ok_or(EngineError::NoUserMessage)?;

        let removed = self.messages.split_off(cut);
        let user_text = removed[0].content.clone();
        let snapshot = RetrySnapshot {
            cut,
            removed,
            model: self.model.clone(),
            preset_id: self.preset_id.clone(),
            saved_len: self.saved_len,
        };
        self.state.begin_generation(Some(snapshot))?;

        self.saved_len = self.saved_len.min(cut);
        if let Some(model) = options.model {
            self.model = model;
        }
        if options.preset_id.is_some() {
            self.preset_id = options.preset_id;
        }
        tracing::info!(session_id = ?self.session_id, model = %self.model, "retrying last turn");

        self.messages.push(Message::user(user_text));
        let mark = self.messages.len();
        Ok(Turn::new(self, mark))
    }

    /// Keeps the retried answer: the replaced turn is soft-deleted and the
    /// new one persisted, along with the new model and preset.
    pub async fn accept_retry(&mut self) -> Result<Option<i64>, EngineError> {
        let snapshot = self.state.take_retry()?;
        match self.persist_accepted_retry(&snapshot).await {
            Ok(session_id) => {
                tracing::info!(session_id = ?session_id, model = %self.model, "retry accepted");
                Ok(session_id)
            }
            Err(error) => {
                self.state.restore_retry(snapshot);
                Err(error)
            }
        }
    }

    async fn persist_accepted_retry(
        &mut self,
        snapshot: &RetrySnapshot,
    ) -> Result<Option<i64>, EngineError> {
        let Some(session_id) = self.session_id else {
            if self.services.settings.autosave {
                return Ok(Some(self.save().await?));
            }
            return Ok(None);
        };

        let _lock = self.services.store.lock_session(session_id).await;
        let replaced: Vec<i64> = snapshot
            .removed
            .iter()
            .filter_map(|message| message.id)
            .collect();
        let owner = self.owner.as_deref();
        self.services
            .store
            .soft_delete_messages(session_id, owner, &replaced)
            .await?;
        if self.model != snapshot.model {
            self.services
                .store
                .update_model(session_id, owner, &self.model)
                .await?;
        }
        if self.preset_id != snapshot.preset_id {
            self.services
                .store
                .update_preset(session_id, owner, self.preset_id.as_deref())
                .await?;
        }
        self.append_unsaved(session_id).await?;
        Ok(Some(session_id))
    }

    /// Discards the retried answer and restores the previous turn, model
    /// and preset. Nothing is written.
    pub fn reject_retry(&mut self) -> Result<(), EngineError> {
        let snapshot = self.state.take_retry()?;
        self.restore(snapshot);
        tracing::info!(session_id = ?self.session_id, model = %self.model, "retry rejected");
        Ok(())
    }

    /// Keeps the first `turn` turns and soft-deletes everything after them.
    ///
    /// Rewinding past the last turn changes nothing, but a durable session
    /// that no longer exists is still reported.
    pub async fn rewind(&mut self, turn: usize) -> Result<(), EngineError> {
        self.state.ensure_idle()?;

        if let Some(session_id) = self.session_id {
            let _lock = self.services.store.lock_session(session_id).await;
            let marked = self
                .services
                .store
                .soft_delete_after_turn(session_id, self.owner.as_deref(), turn)
                .await?;
            tracing::info!(session_id, turn, marked, "session rewound");
        }

        if let Some(cut) = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, message)| message.is_user())
            .nth(turn)
            .map(|(index, _)| index)
        {
            self.messages.truncate(cut);
            self.saved_len = self.saved_len.min(cut);
        }
        Ok(())
    }

    /// Uses `model` for subsequent turns, persisting it on a durable session.
    pub async fn switch_model(&mut self, model: impl Into<String>) -> Result<(), EngineError> {
        self.state.ensure_idle()?;
        let model = model.into();
        if let Some(session_id) = self.session_id {
            self.services
                .store
                .update_model(session_id, self.owner.as_deref(), &model)
                .await?;
        }
        tracing::info!(session_id = ?self.session_id, model = %model, "model switched");
        self.model = model;
        Ok(())
    }

    /// Selects a generation preset (or none) for subsequent turns.
    pub async fn set_preset(&mut self, preset_id: Option<&str>) -> Result<(), EngineError> {
        self.state.ensure_idle()?;
        if let Some(preset_id) = preset_id {
            ensure_known_preset(&self.services, preset_id)?;
        }
        if let Some(session_id) = self.session_id {
            self.services
                .store
                .update_preset(session_id, self.owner.as_deref(), preset_id)
                .await?;
        }
        self.preset_id = preset_id.map(str::to_string);
        Ok(())
    }

    /// Sets the session title, saving the session first if needed. Titles
    /// are stored unencrypted.
    pub async fn set_title(&mut self, title: Option<&str>) -> Result<(), EngineError> {
        let session_id = self.save().await?;
        self.services
            .store
            .update_title(session_id, self.owner.as_deref(), title)
            .await?;
        Ok(())
    }

    /// Persists the session. The first call creates it with every message so
    /// far; later calls append only what was added since the previous save.
    pub async fn save(&mut self) -> Result<i64, EngineError> {
        self.state.ensure_idle()?;

        match self.session_id {
            Some(session_id) => {
                let _lock = self.services.store.lock_session(session_id).await;
                self.append_unsaved(session_id).await?;
                Ok(session_id)
            }
            None => self.create_session().await,
        }
    }

    /// Drops a trailing user message that never received an answer and was
    /// never saved. Returns its text.
    pub fn rollback_pending_user_message(&mut self) -> Option<String> {
        if self.state.ensure_idle().is_err() || self.saved_len == self.messages.len() {
            return None;
        }
        if !self.messages.last().is_some_and(Message::is_user) {
            return None;
        }
        self.messages.pop().map(|message| message.content)
    }

    async fn create_session(&mut self) -> Result<i64, EngineError> {
        let session = NewSession {
            model: self.model.clone(),
            title: None,
            project_root: self
                .project_root
                .as_ref()
                .map(|root| root.to_string_lossy().into_owned()),
            system_prompt: self.system_prompt.clone(),
            preset_id: self.preset_id.clone(),
            owner: self.owner.clone(),
        };
        let rows: Vec<NewMessage> = self.messages.iter().map(Message::to_new_message).collect();

        let created = self.services.store.create_session(&session, &rows).await?;
        self.mark_saved(0, &created.message_ids);
        self.session_id = Some(created.session_id);
        Ok(created.session_id)
    }

    async fn append_unsaved(&mut self, session_id: i64) -> Result<(), EngineError> {
        if self.saved_len == self.messages.len() {
            return Ok(());
        }

        let rows: Vec<NewMessage> = self.messages[self.saved_len..]
            .iter()
            .map(Message::to_new_message)
            .collect();
        let ids = self
            .services
            .store
            .append_messages(session_id, self.owner.as_deref(), &rows)
            .await?;
        tracing::debug!(session_id, appended = ids.len(), "messages saved");
        self.mark_saved(self.saved_len, &ids);
        Ok(())
    }

    fn mark_saved(&mut self, from: usize, ids: &[i64]) {
        for (message, id) in self.messages[from..].iter_mut().zip(ids) {
            message.id = Some(*id);
        }
        self.saved_len = self.messages.len();
    }

    fn restore(&mut self, snapshot: RetrySnapshot) {
        self.messages.truncate(snapshot.cut);
        self.messages.extend(snapshot.removed);
        self.model = snapshot.model;
        self.preset_id = snapshot.preset_id;
        self.saved_len = snapshot.saved_len;
    }

    pub(crate) fn build_request(&self) -> ChatRequest {
        let settings = &self.services.settings;
        let options = self
            .preset_id
            .as_deref()
            .and_then(|preset_id| settings.preset(preset_id))
            .cloned()
            .unwrap_or_default()
            .with_default_context(context_window_for(settings, &self.model));

        ChatRequest {
            model: self.model.clone(),
            messages: self.transcript(),
            tools: self
                .tools
                .as_ref()
                .map(|tools| tools.definitions())
                .unwrap_or_default(),
            options,
        }
    }

    pub(crate) fn provider(&self) -> Arc<dyn ChatProvider> {
        Arc::clone(&self.services.provider)
    }

    pub(crate) fn max_tool_rounds(&self) -> usize {
        self.services.settings.max_tool_rounds
    }

    pub(crate) fn autosave(&self) -> bool {
        self.services.settings.autosave
    }

    pub(crate) fn enter_tool_round(&mut self, request: Message) {
        self.messages.push(request);
        self.state.enter_tool_round();
    }

    pub(crate) fn push_tool_result(&mut self, tool_name: &str, content: String) {
        self.messages.push(Message::tool(tool_name, content));
    }

    pub(crate) fn resume_generation(&mut self) {
        self.state.resume_generation();
    }

    pub(crate) async fn run_tool(&self, call: ToolCall) -> ToolOutput {
        let Some(tools) = self.tools.clone() else {
            return ToolOutput::fail(format!(
                "{} is unavailable: no project is attached to this conversation",
                call.name
            ));
        };

        match tokio::task::spawn_blocking(move || tools.execute(&call)).await {
            Ok(output) => output,
            Err(error) => ToolOutput::fail(format!("tool execution failed: {error}")),
        }
    }

    /// Appends the final answer. Returns true when it awaits a retry decision.
    pub(crate) fn finish_generation(&mut self, answer: Message) -> bool {
        self.messages.push(answer);
        self.state.finish_generation()
    }

    pub(crate) fn abort_generation(&mut self, mark: usize) {
        match self.state.abort_generation() {
            Some(snapshot) => self.restore(snapshot),
            None => self.messages.truncate(mark),
        }
        tracing::warn!(session_id = ?self.session_id, "generation abandoned; partial output discarded");
    }
}

fn ensure_known_preset(services: &Services, preset_id: &str) -> Result<(), EngineError> {
    if services.settings.preset(preset_id).is_some() {
        Ok(())
    } else {
        Err(EngineError::UnknownPreset(preset_id.to_string()))
    }
}

/// Parses a caller-supplied turn number. Negative and non-numeric input is
/// rejected rather than clamped.
pub fn parse_turn_number(input: &str) -> Result<usize, EngineError> {
    input
        .trim()
        .parse::<usize>()
        .map_err(|_| EngineError::InvalidTurnNumber {
            input: input.to_string(),
        })
}
