use std::path::PathBuf;
use std::sync::mpsc::TrySendError;

use chrono::{DateTime, Utc};
use portable_pty::ChildKiller;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::error::{Result, TerminalError};
use crate::io_thread::InputSender;
use crate::pty::{Geometry, PtyHandle};
use crate::remote::RemoteEndpoint;

/// Unique identifier for a terminal session.
pub type SessionId = u64;

/// What kind of process backs a session. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Local,
    Ssh,
    Sftp,
}

impl SessionKind {
    pub fn is_remote(&self) -> bool {
        !matches!(self, SessionKind::Local)
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionKind::Local => "local",
            SessionKind::Ssh => "ssh",
            SessionKind::Sftp => "sftp",
        };
        f.write_str(name)
    }
}

/// Connection metadata kept with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Connection {
    Local { working_dir: PathBuf },
    Remote(RemoteEndpoint),
}

/// The OS process behind a session.
pub(crate) struct ProcessHandle {
    pub pid: Option<u32>,
    pub killer: Box<dyn ChildKiller + Send + Sync>,
}

/// Why a session is going from live to dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Closed on request: the process is killed and pending output dropped.
    Requested,
    /// The process was seen to exit; `None` when its status was unreadable.
    Exited(Option<u32>),
}

/// Everything a live record must give back when it dies.
pub(crate) struct SessionHandles {
    pub pty: PtyHandle,
    pub process: ProcessHandle,
    pub io_stop: mpsc::Sender<()>,
    pub input: InputSender,
    /// Startup files generated for the shell, removed with the session.
    pub rc_dir: Option<TempDir>,
}

/// Live state of one session, owned by the registry.
///
/// While `alive` the record holds its PTY and process handles; the
/// transition to dead releases both, exactly once.
pub struct SessionRecord {
    id: SessionId,
    kind: SessionKind,
    connection: Connection,
    created_at: DateTime<Utc>,
    title: String,
    close_after_exit: bool,
    geometry: Geometry,
    alive: bool,
    exit_code: Option<u32>,
    pid: Option<u32>,
    pty: Option<PtyHandle>,
    process: Option<ProcessHandle>,
    io_stop: Option<mpsc::Sender<()>>,
    input: Option<InputSender>,
    rc_dir: Option<TempDir>,
}

impl SessionRecord {
    pub(crate) fn new(
        id: SessionId,
        kind: SessionKind,
        connection: Connection,
        title: String,
        close_after_exit: bool,
        handles: SessionHandles,
    ) -> Self {
        let SessionHandles {
            pty,
            process,
            io_stop,
            input,
            rc_dir,
        } = handles;
        Self {
            id,
            kind,
            connection,
            created_at: Utc::now(),
            title,
            close_after_exit,
            geometry: pty.geometry(),
            alive: true,
            exit_code: None,
            pid: process.pid,
            pty: Some(pty),
            process: Some(process),
            io_stop: Some(io_stop),
            input: Some(input),
            rc_dir,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn close_after_exit(&self) -> bool {
        self.close_after_exit
    }

    /// Whether any OS handle is still held.
    pub fn holds_handles(&self) -> bool {
        self.pty.is_some() || self.process.is_some() || self.input.is_some()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            kind: self.kind,
            connection: self.connection.clone(),
            created_at: self.created_at,
            title: self.title.clone(),
            geometry: self.geometry,
            alive: self.alive,
            pid: self.pid,
            exit_code: self.exit_code,
            close_after_exit: self.close_after_exit,
        }
    }

    /// Queue `data` for the session's writer thread. Never blocks: a child
    /// that stops reading fills the queue and further writes are refused.
    pub(crate) fn write(&self, data: &[u8]) -> Result<()> {
        if !self.alive {
            return Err(TerminalError::write_failed(self.id, "session is closed"));
        }
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| TerminalError::write_failed(self.id, "input is closed"))?;
        input.try_send(data.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => TerminalError::write_failed(self.id, "input queue is full"),
            TrySendError::Disconnected(_) => {
                TerminalError::write_failed(self.id, "input writer has stopped")
            }
        })
    }

    pub(crate) fn resize(&mut self, geometry: Geometry) -> Result<()> {
        let id = self.id;
        let failed = |reason: String| TerminalError::ResizeFailed { id, reason };
        if !geometry.is_valid() {
            return Err(failed(format!(
                "invalid geometry {}x{}",
                geometry.rows, geometry.cols
            )));
        }
        if !self.alive {
            return Err(failed("session has exited".into()));
        }
        let pty = self
            .pty
            .as_mut()
            .ok_or_else(|| failed("PTY is closed".into()))?;
        pty.resize(geometry).map_err(|e| failed(e.to_string()))?;
        self.geometry = geometry;
        Ok(())
    }

    /// Move to dead, releasing every handle. Returns `false` when the record
    /// was already dead, in which case nothing is touched.
    pub(crate) fn mark_dead(&mut self, cause: Teardown) -> bool {
        if !self.alive {
            return false;
        }
        self.alive = false;
        match cause {
            Teardown::Requested => self.release(true),
            Teardown::Exited(code) => {
                self.exit_code = code;
                self.release(false);
            }
        }
        true
    }

    fn release(&mut self, on_request: bool) {
        // Queued input still drains; the writer thread owns the descriptor.
        self.input = None;
        if let Some(stop) = self.io_stop.take() {
            if on_request {
                let _ = stop.try_send(());
            }
        }
        if let Some(mut process) = self.process.take() {
            if on_request {
                if let Err(e) = process.killer.kill() {
                    log::debug!("session {}: kill failed: {e}", self.id);
                }
            }
        }
        if let Some(mut pty) = self.pty.take() {
            pty.close();
        }
        self.rc_dir = None;
    }
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        self.mark_dead(Teardown::Requested);
    }
}

/// Point-in-time copy of a session record, free of OS handles.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub connection: Connection,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub geometry: Geometry,
    pub alive: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<u32>,
    pub close_after_exit: bool,
}
