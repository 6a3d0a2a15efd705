use std::path::PathBuf;

use field_codec::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error while {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to run migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Also returned when the session exists but belongs to another owner.
    #[error("session {session_id} not found")]
    NotFound { session_id: i64 },

    #[error("field codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("message {message_id} has unsupported role '{role}'")]
    InvalidRole { message_id: i64, role: String },

    #[error("invalid RFC3339 timestamp in field '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("failed to serialize tool calls: {0}")]
    ToolCallsSerialize(#[source] serde_json::Error),

    #[error("message {message_id} has unreadable tool calls: {source}")]
    ToolCallsParse {
        message_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn database(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { operation, source }
    }

    /// Returns true for ownership mismatches and missing sessions alike.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
