//! Per-session working directory state derived from OSC7 events.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::host::HostIdentity;
use crate::osc7::{Osc7Event, Osc7Status};

/// Display-ready location of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryState {
    /// Host as reported by the shell; empty when the URI named none.
    pub hostname: String,
    /// Absolute path as reported.
    pub path: String,
    /// `~`-relative when under the host's home directory, else `path`.
    pub display_path: String,
    /// Whether `hostname` refers to the local machine.
    pub is_local: bool,
}

impl DirectoryState {
    /// Tab-title form: `host:display` for remote hosts when asked, otherwise
    /// just the display path.
    pub fn title(&self, show_hostname: bool) -> String {
        if show_hostname && !self.is_local {
            format!("{}:{}", self.hostname, self.display_path)
        } else {
            self.display_path.clone()
        }
    }
}

/// Tracks the last announced directory of every session.
///
/// Only `Success` events change state. Entries appear on the first valid
/// event for a key and disappear on [`DirectoryTracker::remove`].
pub struct DirectoryTracker<K> {
    states: Mutex<HashMap<K, DirectoryState>>,
    local: HostIdentity,
    home: Option<PathBuf>,
    remote_homes: Mutex<HashMap<String, PathBuf>>,
}

impl<K> DirectoryTracker<K>
where
    K: Eq + Hash + Copy,
{
    /// Tracker for this machine's hostname and home directory.
    pub fn new() -> Self {
        Self::with_identity(HostIdentity::detect(), dirs::home_dir())
    }

    pub fn with_identity(local: HostIdentity, home: Option<PathBuf>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            local,
            home,
            remote_homes: Mutex::new(HashMap::new()),
        }
    }

    /// Record the home directory of a remote host so its paths abbreviate.
    pub fn set_remote_home(&self, hostname: &str, home: impl Into<PathBuf>) {
        self.remote_homes
            .lock()
            .insert(hostname.to_ascii_lowercase(), home.into());
    }

    /// Apply an event. Returns the new state when it differs from the old one.
    pub fn on_event(&self, key: K, event: &Osc7Event) -> Option<DirectoryState> {
        if event.status != Osc7Status::Success {
            return None;
        }

        let is_local = self.local.matches(&event.hostname);
        let display_path = self.display_path(&event.hostname, is_local, &event.path);
        let state = DirectoryState {
            hostname: event.hostname.clone(),
            path: event.path.clone(),
            display_path,
            is_local,
        };

        let mut states = self.states.lock();
        if states.get(&key) == Some(&state) {
            return None;
        }
        states.insert(key, state.clone());
        Some(state)
    }

    pub fn current(&self, key: K) -> Option<DirectoryState> {
        self.states.lock().get(&key).cloned()
    }

    pub fn remove(&self, key: K) {
        self.states.lock().remove(&key);
    }

    /// Number of sessions with a known directory.
    pub fn tracked(&self) -> usize {
        self.states.lock().len()
    }

    pub fn local_identity(&self) -> &HostIdentity {
        &self.local
    }

    fn display_path(&self, hostname: &str, is_local: bool, path: &str) -> String {
        let home = if is_local {
            self.home.clone()
        } else {
            self.remote_home(hostname)
        };
        match home {
            Some(home) => abbreviate_home(Path::new(path), &home),
            None => path.to_string(),
        }
    }

    fn remote_home(&self, hostname: &str) -> Option<PathBuf> {
        let homes = self.remote_homes.lock();
        if let Some(home) = homes.get(&hostname.to_ascii_lowercase()) {
            return Some(home.clone());
        }
        // Registered under the other (short or qualified) form.
        let reported = HostIdentity::new(hostname);
        homes
            .iter()
            .find(|(name, _)| reported.matches(name))
            .map(|(_, home)| home.clone())
    }
}

impl<K> Default for DirectoryTracker<K>
where
    K: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

/// `~` + suffix when `path` is `home` or below it, compared by component.
fn abbreviate_home(path: &Path, home: &Path) -> String {
    if home.as_os_str().is_empty() || home == Path::new("/") {
        return path.display().to_string();
    }
    match path.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Ok(rest) => format!("~/{}", rest.display()),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc7::Osc7Parser;

    fn tracker() -> DirectoryTracker<u64> {
        DirectoryTracker::with_identity(
            HostIdentity::new("workstation"),
            Some(PathBuf::from("/home/alice")),
        )
    }

    fn event(bytes: &[u8]) -> Osc7Event {
        Osc7Parser::new()
            .feed(bytes)
            .events
            .into_iter()
            .next()
            .expect("one event")
    }

    #[test]
    fn test_path_outside_home_is_unchanged() {
        let t = tracker();
        let state = t.on_event(1, &event(b"\x1b]7;file:///tmp/project\x07")).unwrap();
        assert_eq!(state.path, "/tmp/project");
        assert_eq!(state.display_path, "/tmp/project");
        assert!(state.is_local);
        assert_eq!(t.current(1), Some(state));
    }

    #[test]
    fn test_path_under_home_is_abbreviated() {
        let t = tracker();
        t.on_event(1, &event(b"\x1b]7;file:///tmp/project\x07"));
        let state = t
            .on_event(1, &event(b"\x1b]7;file://workstation/home/alice/docs\x07"))
            .unwrap();
        assert_eq!(state.path, "/home/alice/docs");
        assert_eq!(state.display_path, "~/docs");
    }

    #[test]
    fn test_home_itself_is_tilde() {
        let t = tracker();
        let state = t.on_event(1, &event(b"\x1b]7;file:///home/alice/\x07")).unwrap();
        assert_eq!(state.display_path, "~");
    }

    #[test]
    fn test_sibling_of_home_is_not_abbreviated() {
        let t = tracker();
        let state = t.on_event(1, &event(b"\x1b]7;file:///home/alicea/x\x07")).unwrap();
        assert_eq!(state.display_path, "/home/alicea/x");
    }

    #[test]
    fn test_qualified_local_name_uses_local_home() {
        let t = tracker();
        let state = t
            .on_event(1, &event(b"\x1b]7;file://WORKSTATION.lan/home/alice/src\x07"))
            .unwrap();
        assert!(state.is_local);
        assert_eq!(state.display_path, "~/src");
    }

    #[test]
    fn test_remote_host_without_known_home_is_unchanged() {
        let t = tracker();
        let state = t
            .on_event(2, &event(b"\x1b]7;file://buildbox/home/alice/src\x07"))
            .unwrap();
        assert!(!state.is_local);
        assert_eq!(state.display_path, "/home/alice/src");
        assert_eq!(state.title(true), "buildbox:/home/alice/src");
        assert_eq!(state.title(false), "/home/alice/src");
    }

    #[test]
    fn test_remote_home_registered_under_short_name() {
        let t = tracker();
        t.set_remote_home("buildbox", "/home/ci");
        let state = t
            .on_event(2, &event(b"\x1b]7;file://buildbox.corp/home/ci/jobs\x07"))
            .unwrap();
        assert_eq!(state.display_path, "~/jobs");
        assert_eq!(state.title(true), "buildbox.corp:~/jobs");
    }

    #[test]
    fn test_failed_and_partial_events_are_ignored() {
        let t = tracker();
        assert!(t.on_event(1, &event(b"\x1b]7;http://x/y\x07")).is_none());
        assert!(t.on_event(1, &event(b"\x1b]7;file:///incompl")).is_none());
        assert!(t.current(1).is_none());
        assert_eq!(t.tracked(), 0);
    }

    #[test]
    fn test_repeat_event_is_not_a_change() {
        let t = tracker();
        let ev = event(b"\x1b]7;file:///srv\x07");
        assert!(t.on_event(1, &ev).is_some());
        assert!(t.on_event(1, &ev).is_none());
    }

    #[test]
    fn test_sessions_are_independent_and_removable() {
        let t = tracker();
        t.on_event(1, &event(b"\x1b]7;file:///a\x07"));
        t.on_event(2, &event(b"\x1b]7;file:///b\x07"));
        assert_eq!(t.current(1).unwrap().path, "/a");
        assert_eq!(t.current(2).unwrap().path, "/b");

        t.remove(1);
        assert!(t.current(1).is_none());
        assert_eq!(t.tracked(), 1);
        t.remove(1);
    }

    #[test]
    fn test_root_home_is_never_abbreviated() {
        let t: DirectoryTracker<u64> =
            DirectoryTracker::with_identity(HostIdentity::new("h"), Some(PathBuf::from("/")));
        let state = t.on_event(1, &event(b"\x1b]7;file:///etc\x07")).unwrap();
        assert_eq!(state.display_path, "/etc");
    }
}
