//! Session lifecycle tracking and exit dispatch.
//!
//! Each session moves `Starting -> Running -> Exited -> Reaped`, never
//! backwards. Exits are reported by the per-session waiter thread and
//! dispatched by one tokio task, which reaps the session and notifies
//! subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use conch_osc::DirectoryTracker;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::events::SessionEvent;
use crate::registry::Registry;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LifecycleState {
    /// Spawn in progress.
    Starting,
    /// Process launched and registered.
    Running,
    /// The OS reported termination, or the session was closed.
    Exited,
    /// Resources released and record removed. Terminal.
    Reaped,
}

/// Reaped sessions whose final state stays queryable.
const REAPED_HISTORY: usize = 64;

/// Exit callback: session id and exit code, when one was observed.
pub type ExitCallback = Box<dyn Fn(SessionId, Option<u32>) + Send + Sync>;

/// Sent by a waiter thread once its session has been marked dead.
#[derive(Debug)]
pub(crate) struct ExitNotice {
    pub id: SessionId,
    pub exit_code: Option<u32>,
    pub close_after_exit: bool,
}

pub struct LifecycleMonitor {
    states: DashMap<SessionId, LifecycleState>,
    /// Oldest first; ids past `REAPED_HISTORY` are dropped from `states`.
    reaped: Mutex<VecDeque<SessionId>>,
    callbacks: RwLock<Vec<ExitCallback>>,
    notices: mpsc::UnboundedSender<ExitNotice>,
}

impl LifecycleMonitor {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ExitNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            states: DashMap::new(),
            reaped: Mutex::new(VecDeque::new()),
            callbacks: RwLock::new(Vec::new()),
            notices,
        };
        (monitor, rx)
    }

    /// Begin tracking a session that is being spawned.
    pub(crate) fn track(&self, id: SessionId) {
        self.states.insert(id, LifecycleState::Starting);
    }

    /// Stop tracking a session whose spawn failed.
    pub(crate) fn forget(&self, id: SessionId) {
        self.states.remove(&id);
    }

    /// Move `id` forward to `next`. Returns `false` for unknown sessions and
    /// for transitions that would not move forward.
    pub(crate) fn advance(&self, id: SessionId, next: LifecycleState) -> bool {
        let moved = match self.states.get_mut(&id) {
            Some(mut state) if *state < next => {
                log::debug!("session {id}: {:?} -> {next:?}", *state);
                *state = next;
                true
            }
            _ => false,
        };
        if moved && next == LifecycleState::Reaped {
            self.retire(id);
        }
        moved
    }

    /// Remember `id` as reaped, forgetting the oldest reaped session once the
    /// history is full. Must not run while a `states` guard is held.
    fn retire(&self, id: SessionId) {
        let mut reaped = self.reaped.lock();
        reaped.push_back(id);
        while reaped.len() > REAPED_HISTORY {
            if let Some(old) = reaped.pop_front() {
                self.states.remove(&old);
            }
        }
    }

    /// Number of sessions with a known state.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, id: SessionId) -> Option<LifecycleState> {
        self.states.get(&id).map(|s| *s)
    }

    /// Register a callback invoked for every session that exits on its own.
    pub fn subscribe(&self, callback: ExitCallback) {
        self.callbacks.write().push(callback);
    }

    pub(crate) fn notify_exit(&self, notice: ExitNotice) {
        if self.notices.send(notice).is_err() {
            log::warn!("lifecycle monitor is not running; exit notice dropped");
        }
    }

    /// Reap a session whose process exited and tell everyone about it.
    pub(crate) fn reap(
        &self,
        notice: ExitNotice,
        registry: &Registry,
        tracker: &DirectoryTracker<SessionId>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) {
        let ExitNotice {
            id,
            exit_code,
            close_after_exit,
        } = notice;

        registry.unregister(id);
        tracker.remove(id);
        if !self.advance(id, LifecycleState::Reaped) {
            return;
        }
        log::info!("session {id} exited with {exit_code:?}");

        for callback in self.callbacks.read().iter() {
            callback(id, exit_code);
        }
        let _ = events.send(SessionEvent::Exited { id, exit_code });
        if close_after_exit {
            let _ = events.send(SessionEvent::CloseRequested { id });
        }
    }

    /// Tear down a session on request. Exit subscribers are not notified.
    pub(crate) fn close(
        &self,
        id: SessionId,
        registry: &Registry,
        tracker: &DirectoryTracker<SessionId>,
    ) -> bool {
        let removed = registry.unregister(id);
        tracker.remove(id);
        self.advance(id, LifecycleState::Exited);
        self.advance(id, LifecycleState::Reaped);
        removed
    }
}

/// Run the exit dispatch loop until `stop_rx` fires.
pub(crate) fn start_monitor(
    monitor: Arc<LifecycleMonitor>,
    mut notices: mpsc::UnboundedReceiver<ExitNotice>,
    registry: Arc<Registry>,
    tracker: Arc<DirectoryTracker<SessionId>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Some(notice) => monitor.reap(notice, &registry, &tracker, &events),
                    None => return,
                },
                _ = stop_rx.recv() => return,
            }
        }
    });
}
