use std::path::PathBuf;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced to callers of the terminal host.
///
/// Runtime failures of a running child (crash, broken pipe) are not errors;
/// they arrive as exit notifications instead.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("invalid working directory {}: {reason}", path.display())]
    InvalidWorkingDirectory { path: PathBuf, reason: String },

    #[error("failed to launch {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("no pseudo-terminal available: {0}")]
    ResourceExhausted(String),

    #[error("write to session {id} failed: {reason}")]
    WriteFailed { id: SessionId, reason: String },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("resize of session {id} failed: {reason}")]
    ResizeFailed { id: SessionId, reason: String },

    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("config error: {0}")]
    Config(String),
}

impl TerminalError {
    pub(crate) fn write_failed(id: SessionId, reason: impl ToString) -> Self {
        TerminalError::WriteFailed {
            id,
            reason: reason.to_string(),
        }
    }
}

impl Serialize for TerminalError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TerminalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = TerminalError::InvalidWorkingDirectory {
            path: PathBuf::from("/nonexistent-xyz"),
            reason: "does not exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid working directory /nonexistent-xyz: does not exist"
        );
        assert_eq!(
            TerminalError::SessionNotFound(7).to_string(),
            "session 7 not found"
        );
    }

    #[test]
    fn test_serializes_as_display_string() {
        let err = TerminalError::write_failed(3, "session is closed");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"write to session 3 failed: session is closed\"");
    }
}
