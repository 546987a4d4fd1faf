//! Events sent from the core to the presentation layer.

use conch_osc::DirectoryState;
use serde::Serialize;

use crate::session::SessionId;

/// Everything a front end needs to observe, in per-session order.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Raw bytes read from the session's PTY.
    Output { id: SessionId, data: Vec<u8> },
    /// The shell announced a new working directory.
    DirectoryChanged { id: SessionId, state: DirectoryState },
    /// The session's process exited and the session has been reaped.
    Exited { id: SessionId, exit_code: Option<u32> },
    /// The session ran its command to completion and should be closed.
    CloseRequested { id: SessionId },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Output { id, .. }
            | SessionEvent::DirectoryChanged { id, .. }
            | SessionEvent::Exited { id, .. }
            | SessionEvent::CloseRequested { id } => *id,
        }
    }
}
