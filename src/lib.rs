//! Conversation engine for locally hosted language models.
//!
//! A [`ConversationEngine`] owns one session's history. [`ConversationEngine::send`]
//! and [`ConversationEngine::retry`] return a [`Turn`] that the caller pulls
//! for cumulative text snapshots and a single terminal [`TurnOutcome`]. Tool
//! calls requested by the model are run through a sandbox confined to the
//! session's project root and fed back before the final answer.
//!
//! History is persisted through [`session_store`], which seals message
//! content with [`field_codec`] before it reaches the database.
//!
//! # Composition
//! [`Services`] bundles the chat provider, the session store and the
//! [`EngineSettings`]; build it once per process and clone it per engine.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod message;
pub mod prompt;
pub mod services;
pub mod state;
pub mod turn;

pub use crate::config::{ConfigError, EngineSettings};
pub use crate::context::context_window_for;
pub use crate::engine::{parse_turn_number, ConversationEngine, RetryOptions, StartOptions};
pub use crate::error::EngineError;
pub use crate::logging::LoggingError;
pub use crate::message::Message;
pub use crate::prompt::{default_system_prompt, DEFAULT_SYSTEM_PROMPT};
pub use crate::services::{Services, ServicesError};
pub use crate::state::Phase;
pub use crate::turn::{Turn, TurnOutcome, TurnUpdate};
