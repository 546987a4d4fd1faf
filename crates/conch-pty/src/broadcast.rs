//! Fan one input out to several sessions.
//!
//! Delivery is per target: the bytes are queued on each session's own writer
//! thread, so a target whose child stopped reading cannot hold up the others.
//! A failure to one session is recorded and the remaining targets are still
//! written.

use serde::Serialize;

use crate::error::TerminalError;
use crate::registry::{Registry, SharedRecord};
use crate::session::SessionId;

/// Sessions currently targeted by broadcast input, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastGroup {
    ids: Vec<SessionId>,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target. Returns `false` if it was already present.
    pub fn insert(&mut self, id: SessionId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn remove(&mut self, id: SessionId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|t| *t != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.ids.contains(&id)
    }

    /// Drop targets that no longer exist in `registry`.
    pub fn retain_registered(&mut self, registry: &Registry) {
        self.ids.retain(|id| registry.contains(*id));
    }

    pub fn ids(&self) -> &[SessionId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<SessionId> for BroadcastGroup {
    fn from_iter<I: IntoIterator<Item = SessionId>>(iter: I) -> Self {
        let mut group = Self::new();
        for id in iter {
            group.insert(id);
        }
        group
    }
}

/// Per-target outcome of one broadcast.
#[derive(Debug, Default, Serialize)]
pub struct BroadcastReport {
    /// Targets that queued the full byte sequence for writing.
    pub delivered: Vec<SessionId>,
    /// Targets that were resolved but could not be written.
    pub failures: Vec<(SessionId, TerminalError)>,
    /// Targets already gone from the registry when the broadcast began.
    pub skipped: Vec<SessionId>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

/// A broadcast target pinned at the start of the call.
pub(crate) enum Target {
    Resolved(SessionId, SharedRecord),
    Missing(SessionId),
}

/// Pin every target in group order. A target that dies after this point is
/// reported as a write failure, not skipped.
pub(crate) fn resolve(registry: &Registry, group: &BroadcastGroup) -> Vec<Target> {
    group
        .ids()
        .iter()
        .map(|id| match registry.record(*id) {
            Some(record) => Target::Resolved(*id, record),
            None => Target::Missing(*id),
        })
        .collect()
}

pub(crate) fn deliver(targets: Vec<Target>, data: &[u8]) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for target in targets {
        match target {
            Target::Missing(id) => {
                log::debug!("broadcast target {id} no longer registered, skipping");
                report.skipped.push(id);
            }
            Target::Resolved(id, record) => {
                let result = record.lock().write(data);
                match result {
                    Ok(()) => report.delivered.push(id),
                    Err(e) => {
                        log::warn!("broadcast to session {id} failed: {e}");
                        report.failures.push((id, e));
                    }
                }
            }
        }
    }
    report
}

/// Write `data` to every session in `group`.
pub fn broadcast(registry: &Registry, group: &BroadcastGroup, data: &[u8]) -> BroadcastReport {
    deliver(resolve(registry, group), data)
}
