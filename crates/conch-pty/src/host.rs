//! `TerminalHost`: the interface a presentation layer drives.

use std::path::PathBuf;
use std::sync::Arc;

use conch_osc::{DirectoryState, DirectoryTracker};
use tokio::sync::mpsc;

use crate::broadcast::{broadcast, BroadcastGroup, BroadcastReport};
use crate::config::TerminalConfig;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::launch::LaunchRequest;
use crate::monitor::{start_monitor, LifecycleMonitor, LifecycleState};
use crate::pty::Geometry;
use crate::registry::Registry;
use crate::session::{SessionId, SessionInfo, SessionKind};
use crate::spawner::{SpawnParams, Spawner};
use crate::ssh_config::SshConfig;

/// Owns every session and the machinery around them.
///
/// Output, directory changes and exits arrive on the receiver returned by
/// [`TerminalHost::new`]. Dropping the host closes every session.
pub struct TerminalHost {
    registry: Arc<Registry>,
    tracker: Arc<DirectoryTracker<SessionId>>,
    monitor: Arc<LifecycleMonitor>,
    spawner: Spawner,
    ssh_config: SshConfig,
    monitor_stop: mpsc::Sender<()>,
}

impl TerminalHost {
    /// Build a host for this machine. Must be called within a tokio runtime.
    pub fn new(config: TerminalConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (mut host, events) = Self::with_tracker(config, DirectoryTracker::new());
        host.ssh_config = SshConfig::load_default();
        (host, events)
    }

    /// Build a host around a given directory tracker, without reading any
    /// ssh_config. Must be called within a tokio runtime.
    pub fn with_tracker(
        config: TerminalConfig,
        tracker: DirectoryTracker<SessionId>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let tracker = Arc::new(tracker);
        let (monitor, notices) = LifecycleMonitor::new();
        let monitor = Arc::new(monitor);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (monitor_stop, stop_rx) = mpsc::channel(1);

        start_monitor(
            Arc::clone(&monitor),
            notices,
            Arc::clone(&registry),
            Arc::clone(&tracker),
            events_tx.clone(),
            stop_rx,
        );

        let spawner = Spawner::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&monitor),
            Arc::clone(&tracker),
            events_tx,
        );

        let host = Self {
            registry,
            tracker,
            monitor,
            spawner,
            ssh_config: SshConfig::default(),
            monitor_stop,
        };
        (host, events_rx)
    }

    pub fn set_ssh_config(&mut self, ssh_config: SshConfig) {
        self.ssh_config = ssh_config;
    }

    pub fn open_session(&self, kind: SessionKind, params: SpawnParams) -> Result<SessionId> {
        self.spawner.spawn(kind, params)
    }

    /// Open a session from a front-end launch request.
    pub fn launch(&self, request: LaunchRequest) -> Result<SessionId> {
        let (kind, params) = request.into_spawn(&self.ssh_config)?;
        self.open_session(kind, params)
    }

    /// Close a session. Closing an unknown or already closed session is a
    /// no-op.
    pub fn close_session(&self, id: SessionId) {
        self.monitor.close(id, &self.registry, &self.tracker);
    }

    /// Close every session.
    pub fn shutdown(&self) {
        for id in self.registry.list() {
            self.close_session(id);
        }
    }

    pub fn write_input(&self, id: SessionId, data: &[u8]) -> Result<()> {
        self.registry.write(id, data)
    }

    pub fn broadcast_input(&self, group: &BroadcastGroup, data: &[u8]) -> BroadcastReport {
        broadcast(&self.registry, group, data)
    }

    pub fn resize(&self, id: SessionId, rows: u16, cols: u16) -> Result<()> {
        self.registry.resize(id, Geometry::new(rows, cols))
    }

    pub fn geometry(&self, id: SessionId) -> Option<Geometry> {
        self.registry.geometry(id)
    }

    pub fn current_directory(&self, id: SessionId) -> Option<DirectoryState> {
        self.tracker.current(id)
    }

    pub fn set_remote_home(&self, hostname: &str, home: impl Into<PathBuf>) {
        self.tracker.set_remote_home(hostname, home);
    }

    /// Call `callback` with the session id and exit code whenever a
    /// session's process exits on its own.
    pub fn on_session_exited<F>(&self, callback: F)
    where
        F: Fn(SessionId, Option<u32>) + Send + Sync + 'static,
    {
        self.monitor.subscribe(Box::new(callback));
    }

    pub fn lifecycle(&self, id: SessionId) -> Option<LifecycleState> {
        self.monitor.state(id)
    }

    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.registry.list()
    }

    pub fn session_info(&self, id: SessionId) -> Option<SessionInfo> {
        self.registry.get(id)
    }
}

impl Drop for TerminalHost {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.monitor_stop.try_send(());
    }
}
