// ABOUTME: Raw event types emitted by agent backend adapters during one invocation.
// ABOUTME: Every protocol family is mapped onto this single ordered, finite sequence.

use serde::{Deserialize, Serialize};

/// Events emitted by an adapter while a single utterance is being processed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RawEvent {
    /// Work-in-progress signal from the backend
    Progress {
        /// Backend rationale for the current step (may be empty)
        rationale: String,
        /// Whether this trace reports a failure that ends the turn
        is_failure: bool,
        /// Reason attached to a failure trace
        failure_reason: Option<String>,
    },

    /// Decoded bytes of a text chunk, in arrival order
    Chunk(Vec<u8>),

    /// Complete response text for the turn
    Final(String),

    /// Failure that terminates the turn
    Error {
        /// Typed error code for programmatic handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
    },
}

impl RawEvent {
    /// Progress event carrying rationale text
    pub fn progress(rationale: impl Into<String>) -> Self {
        Self::Progress {
            rationale: rationale.into(),
            is_failure: false,
            failure_reason: None,
        }
    }

    /// Progress event for a backend-reported failure trace
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Progress {
            rationale: String::new(),
            is_failure: true,
            failure_reason: Some(reason.into()),
        }
    }

    /// Error event with the given code
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Typed error codes shared by every adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// No adapter resolvable or required configuration missing
    Configuration,
    /// Identity context could not be obtained or was rejected
    AuthFailed,
    /// Request rejected or connection failed
    Transport,
    /// Malformed payload or JSON parse failure
    Protocol,
    /// Failure reported by the backend itself
    BackendFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::AuthFailed => "auth_failed",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::BackendFailure => "backend_failure",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
