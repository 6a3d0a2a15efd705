//! Durable, confidential storage of conversation sessions.
//!
//! Sessions and their messages live in `SQLite`. Message content, reasoning
//! traces, tool-call payloads and the system-prompt snapshot pass through
//! [`field_codec::FieldCodec`] on every write and read. Messages are never
//! hard-deleted by normal operation; rewinds set `deleted_at` instead.

mod error;
mod records;
mod store;

pub use error::SessionStoreError;
pub use records::{
    CreatedSession, MessageRecord, NewMessage, NewSession, SessionRecord, SessionSummary,
    SessionWithMessages,
};
pub use store::{SessionLock, SessionStore};
