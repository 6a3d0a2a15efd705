//! Transport-only client primitives for the local inference backend.
//!
//! This crate owns request building and NDJSON response decoding for the
//! `/api/chat` endpoint only. It intentionally contains no conversation state,
//! no persistence and no retry loop: a failed request or an interrupted stream
//! is surfaced to the caller as-is.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod ndjson;
pub mod payload;
pub mod url;

pub use client::{decode_event_stream, OllamaApiClient, OllamaEventStream};
pub use config::OllamaApiConfig;
pub use error::OllamaApiError;
pub use events::{OllamaDoneStats, OllamaStreamEvent};
pub use ndjson::NdjsonStreamParser;
pub use payload::{OllamaChatRequest, OllamaMessage, OllamaOptions, OllamaTool, OllamaToolCall};
pub use url::normalize_chat_url;
