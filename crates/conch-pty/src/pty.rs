use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from PTY operations.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    OpenFailed(String),
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
    #[error("PTY is closed")]
    Closed,
}

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }

    fn size(&self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

/// One OS pseudo-terminal pair.
///
/// The slave side lives only until a child is spawned on it, so the master
/// reader sees EOF once that child (and anything it forked) goes away.
/// Both ends are released by [`PtyHandle::close`] or on drop.
pub struct PtyHandle {
    master: Option<Box<dyn MasterPty + Send>>,
    slave: Option<Box<dyn SlavePty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    geometry: Geometry,
}

impl PtyHandle {
    /// Allocate a new PTY pair with the given geometry.
    pub fn open(geometry: Geometry) -> Result<Self, PtyError> {
        let pair = native_pty_system()
            .openpty(geometry.size())
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::OpenFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: Some(pair.master),
            slave: Some(pair.slave),
            writer: Some(writer),
            geometry,
        })
    }

    /// Launch `cmd` attached to the slave side. The slave is dropped
    /// afterwards whether or not the launch succeeded.
    pub fn spawn(&mut self, cmd: CommandBuilder) -> Result<Box<dyn Child + Send + Sync>, PtyError> {
        let slave = self.slave.take().ok_or(PtyError::Closed)?;
        slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))
    }

    /// A blocking reader over the master side (shell output -> us).
    ///
    /// Intended for a dedicated I/O thread. The reader is an independent
    /// descriptor, so bytes already buffered stay readable after `close`.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        let master = self.master.as_ref().ok_or(PtyError::Closed)?;
        master
            .try_clone_reader()
            .map_err(|e| PtyError::OpenFailed(format!("failed to clone reader: {e}")))
    }

    /// Move the master writer out, for a dedicated writer thread.
    ///
    /// A write blocks while the child is not reading its input, so sessions
    /// keep the writer away from anything teardown has to lock. After this,
    /// [`PtyHandle::write`] fails with `Closed`.
    pub fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        if self.master.is_none() {
            return Err(PtyError::Closed);
        }
        self.writer.take().ok_or(PtyError::Closed)
    }

    /// Write bytes to the PTY master (user input -> shell).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Change the geometry seen by the attached process.
    ///
    /// The kernel delivers `SIGWINCH` to the foreground process group.
    pub fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError> {
        if !geometry.is_valid() {
            return Err(PtyError::ResizeFailed(format!(
                "invalid geometry {}x{}",
                geometry.rows, geometry.cols
            )));
        }
        let master = self.master.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(geometry.size())
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        self.geometry = geometry;
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Release both ends. Returns `false` when already closed.
    pub fn close(&mut self) -> bool {
        let was_open = self.master.is_some();
        self.writer = None;
        self.slave = None;
        self.master = None;
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }
}
