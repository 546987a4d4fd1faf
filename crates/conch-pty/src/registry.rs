//! The single index of live sessions.
//!
//! Records sit behind their own mutex inside a sharded map, so operations on
//! different sessions never contend. Callers clone the record's `Arc` out of
//! the map before locking it; no map guard is held across a record lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Result, TerminalError};
use crate::pty::Geometry;
use crate::session::{SessionId, SessionInfo, SessionRecord, Teardown};

pub(crate) type SharedRecord = Arc<Mutex<SessionRecord>>;

pub struct Registry {
    records: DashMap<SessionId, SharedRecord>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next unique session ID. IDs are never reused.
    pub fn allocate_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a fully built record under its own ID.
    pub(crate) fn register(&self, record: SessionRecord) -> SessionId {
        let id = record.id();
        let previous = self.records.insert(id, Arc::new(Mutex::new(record)));
        debug_assert!(previous.is_none(), "session {id} registered twice");
        id
    }

    pub(crate) fn record(&self, id: SessionId) -> Option<SharedRecord> {
        self.records.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.record(id).map(|r| r.lock().info())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.records.contains_key(&id)
    }

    /// Registered IDs in creation order.
    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.records.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tear down and remove a session. Safe to call any number of times from
    /// any number of threads; returns `true` only for the call that removed it.
    ///
    /// A still-live record is killed and released before it leaves the index.
    pub fn unregister(&self, id: SessionId) -> bool {
        let Some(record) = self.record(id) else {
            log::debug!("unregister of unknown session {id} ignored");
            return false;
        };
        if record.lock().mark_dead(Teardown::Requested) {
            log::info!("session {id} closed");
        }
        self.records.remove(&id).is_some()
    }

    /// Record that the session's process exited. Returns `false` when the
    /// session is unknown or was already torn down.
    pub(crate) fn mark_exited(&self, id: SessionId, exit_code: Option<u32>) -> bool {
        match self.record(id) {
            Some(record) => record.lock().mark_dead(Teardown::Exited(exit_code)),
            None => false,
        }
    }

    /// Queue `data` as input for `id`. The record lock is held only while
    /// queueing; the write itself happens on the session's writer thread.
    pub fn write(&self, id: SessionId, data: &[u8]) -> Result<()> {
        let record = self.record(id).ok_or(TerminalError::SessionNotFound(id))?;
        let record = record.lock();
        record.write(data)
    }

    pub fn resize(&self, id: SessionId, geometry: Geometry) -> Result<()> {
        let record = self.record(id).ok_or(TerminalError::SessionNotFound(id))?;
        let mut record = record.lock();
        record.resize(geometry)
    }

    pub fn geometry(&self, id: SessionId) -> Option<Geometry> {
        self.record(id).map(|r| r.lock().geometry())
    }

    /// Run `f` while holding the session's lock, if it is still alive.
    ///
    /// Anything `f` does is ordered against the session's death: it either
    /// happens entirely before the transition or not at all.
    pub(crate) fn while_live<R>(&self, id: SessionId, f: impl FnOnce() -> R) -> Option<R> {
        let record = self.record(id)?;
        let record = record.lock();
        if record.is_alive() {
            Some(f())
        } else {
            None
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
