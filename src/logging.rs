//! Process-wide `tracing` subscriber bootstrap.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PARLEY_LOG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log directive {directive:?}: {message}")]
    InvalidDirective { directive: String, message: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs a stderr fmt subscriber filtered by `PARLEY_LOG`, or by
/// `default_directive` when the variable is unset or unparsable.
pub fn init(default_directive: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|error| {
            LoggingError::InvalidDirective {
                directive: default_directive.to_string(),
                message: error.to_string(),
            }
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_initialized() {
        let _ = init("warn");
        assert!(matches!(init("warn"), Err(LoggingError::AlreadyInitialized)));
    }
}
