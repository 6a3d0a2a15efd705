//! Engine lifecycle as an explicit state machine.
//!
//! `Idle -> Generating -> (ToolPending -> Generating)* -> Idle`, with
//! `RetryPending` entered when a retry generation completes and left only
//! through an accept or reject decision.

use crate::error::EngineError;
use crate::message::Message;

/// Observable phase of an engine, without the retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Generating,
    ToolPending,
    RetryPending,
}

/// What a retry replaced, kept until the caller decides.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RetrySnapshot {
    /// Index of the replaced turn's user message.
    pub cut: usize,
    /// The replaced turn, from its user message to the end of the history.
    pub removed: Vec<Message>,
    pub model: String,
    pub preset_id: Option<String>,
    pub saved_len: usize,
}

#[derive(Debug, Default)]
pub(crate) enum EngineState {
    #[default]
    Idle,
    Generating {
        retry: Option<RetrySnapshot>,
    },
    ToolPending {
        retry: Option<RetrySnapshot>,
    },
    RetryPending(RetrySnapshot),
}

impl EngineState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Generating { .. } => Phase::Generating,
            Self::ToolPending { .. } => Phase::ToolPending,
            Self::RetryPending(_) => Phase::RetryPending,
        }
    }

    pub fn ensure_idle(&self) -> Result<(), EngineError> {
        match self {
            Self::Idle => Ok(()),
            Self::Generating { .. } | Self::ToolPending { .. } => Err(EngineError::Busy),
            Self::RetryPending(_) => Err(EngineError::RetryDecisionPending),
        }
    }

    pub fn begin_generation(&mut self, retry: Option<RetrySnapshot>) -> Result<(), EngineError> {
        self.ensure_idle()?;
        *self = Self::Generating { retry };
        Ok(())
    }

    pub fn enter_tool_round(&mut self) {
        if let Self::Generating { retry } = self {
            *self = Self::ToolPending {
                retry: retry.take(),
            };
        }
    }

    pub fn resume_generation(&mut self) {
        if let Self::ToolPending { retry } = self {
            *self = Self::Generating {
                retry: retry.take(),
            };
        }
    }

    /// Ends a successful generation. Returns true when a retry decision is
    /// now pending.
    pub fn finish_generation(&mut self) -> bool {
        match std::mem::take(self) {
            Self::Generating { retry: Some(snapshot) }
            | Self::ToolPending { retry: Some(snapshot) } => {
                *self = Self::RetryPending(snapshot);
                true
            }
            Self::Generating { retry: None } | Self::ToolPending { retry: None } => false,
            other => {
                *self = other;
                false
            }
        }
    }

    /// Abandons a generation, returning what a retry displaced so it can be
    /// restored.
    pub fn abort_generation(&mut self) -> Option<RetrySnapshot> {
        match std::mem::take(self) {
            Self::Generating { retry } | Self::ToolPending { retry } => retry,
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn take_retry(&mut self) -> Result<RetrySnapshot, EngineError> {
        match std::mem::take(self) {
            Self::RetryPending(snapshot) => Ok(snapshot),
            other => {
                *self = other;
                Err(EngineError::NoRetryPending)
            }
        }
    }

    /// Puts a snapshot back after a failed accept.
    pub fn restore_retry(&mut self, snapshot: RetrySnapshot) {
        *self = Self::RetryPending(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RetrySnapshot {
        RetrySnapshot {
            cut: 0,
            removed: Vec::new(),
            model: "m1".to_string(),
            preset_id: None,
            saved_len: 0,
        }
    }

    #[test]
    fn plain_generation_returns_to_idle() {
        let mut state = EngineState::Idle;
        state.begin_generation(None).expect("idle engine can generate");
        assert_eq!(state.phase(), Phase::Generating);
        assert!(matches!(state.begin_generation(None), Err(EngineError::Busy)));

        state.enter_tool_round();
        assert_eq!(state.phase(), Phase::ToolPending);
        state.resume_generation();
        assert!(!state.finish_generation());
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn retry_generation_waits_for_a_decision() {
        let mut state = EngineState::Idle;
        state
            .begin_generation(Some(snapshot()))
            .expect("idle engine can retry");
        assert!(state.finish_generation());
        assert_eq!(state.phase(), Phase::RetryPending);
        assert!(matches!(
            state.ensure_idle(),
            Err(EngineError::RetryDecisionPending)
        ));

        let taken = state.take_retry().expect("pending retry");
        assert_eq!(taken.model, "m1");
        assert_eq!(state.phase(), Phase::Idle);
        assert!(matches!(state.take_retry(), Err(EngineError::NoRetryPending)));
    }

    #[test]
    fn abort_hands_back_the_retry_snapshot() {
        let mut state = EngineState::Idle;
        state
            .begin_generation(Some(snapshot()))
            .expect("idle engine can retry");
        state.enter_tool_round();
        assert!(state.abort_generation().is_some());
        assert_eq!(state.phase(), Phase::Idle);
    }
}
