//! conch-pty: terminal sessions and process lifecycle for Conch.
//!
//! This crate owns the shell processes behind terminal tabs. It spawns them on
//! a PTY (local shells, ssh and sftp clients), streams their output, tracks
//! their working directory from OSC 7 reports, and reaps them when they exit.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — Low-level PTY management (open, write, resize, close).
//! - [`Spawner`] — Validates a request, builds the command line and launches it.
//! - [`Registry`] — Concurrent map of live sessions keyed by [`SessionId`].
//! - [`LifecycleMonitor`] — `Starting -> Running -> Exited -> Reaped`, plus exit
//!   callbacks.
//! - [`BroadcastGroup`] — Sends the same input to several sessions.
//! - [`TerminalHost`] — Ties the above together for a front end.
//!
//! Everything a session produces is delivered as a [`SessionEvent`].

pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
mod io_thread;
pub mod launch;
pub mod monitor;
pub mod pty;
pub mod registry;
pub mod remote;
pub mod session;
pub mod spawner;
pub mod ssh_config;

pub use broadcast::{broadcast, BroadcastGroup, BroadcastReport};
pub use config::{SshOptions, TerminalConfig};
pub use error::{Result, TerminalError};
pub use events::SessionEvent;
pub use host::TerminalHost;
pub use launch::LaunchRequest;
pub use monitor::{ExitCallback, LifecycleMonitor, LifecycleState};
pub use pty::{Geometry, PtyError, PtyHandle};
pub use registry::Registry;
pub use remote::{PortForward, RemoteEndpoint};
pub use session::{Connection, SessionId, SessionInfo, SessionKind};
pub use spawner::{plan_command, CommandPlan, SpawnParams, Spawner};
pub use ssh_config::{SshConfig, SshHost};
