//! Local hostname matching for OSC7 announcements.
//!
//! Shells report the host in whatever form `hostname` prints on that
//! machine, which may be the short name or the fully qualified one. A
//! reported name refers to this machine when it is empty, `localhost`, a
//! case-insensitive match, or matches on the first DNS label.

use std::net::IpAddr;

/// The names under which this machine may appear in OSC7 URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    name: String,
}

impl HostIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Identity of the machine we are running on.
    pub fn detect() -> Self {
        let name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                log::warn!("could not read local hostname: {e}");
                String::new()
            });
        Self::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `reported` names this machine.
    pub fn matches(&self, reported: &str) -> bool {
        let reported = reported.trim_end_matches('.');
        if reported.is_empty() || reported.eq_ignore_ascii_case("localhost") {
            return true;
        }
        let local = self.name.trim_end_matches('.');
        if local.is_empty() {
            return false;
        }
        if reported.eq_ignore_ascii_case(local) {
            return true;
        }
        // Addresses only ever match exactly.
        if reported.parse::<IpAddr>().is_ok() || local.parse::<IpAddr>().is_ok() {
            return false;
        }
        short_name(reported).eq_ignore_ascii_case(short_name(local))
    }
}

fn short_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_localhost_are_local() {
        let me = HostIdentity::new("workstation");
        assert!(me.matches(""));
        assert!(me.matches("localhost"));
        assert!(me.matches("LOCALHOST"));
    }

    #[test]
    fn test_case_insensitive_exact_match() {
        let me = HostIdentity::new("WorkStation");
        assert!(me.matches("workstation"));
        assert!(me.matches("WORKSTATION"));
    }

    #[test]
    fn test_short_and_qualified_forms_match() {
        let short = HostIdentity::new("workstation");
        assert!(short.matches("workstation.lan"));
        assert!(short.matches("Workstation.corp.example.com."));

        let fqdn = HostIdentity::new("workstation.corp.example.com");
        assert!(fqdn.matches("workstation"));
        assert!(fqdn.matches("WORKSTATION.corp.example.com"));
    }

    #[test]
    fn test_other_hosts_do_not_match() {
        let me = HostIdentity::new("workstation.lan");
        assert!(!me.matches("buildbox"));
        assert!(!me.matches("buildbox.lan"));
        assert!(!me.matches("workstation2"));
    }

    #[test]
    fn test_addresses_match_exactly() {
        let me = HostIdentity::new("10.0.0.5");
        assert!(me.matches("10.0.0.5"));
        assert!(!me.matches("10.0.0.6"));
        assert!(!HostIdentity::new("ten").matches("10.1.1.1"));
    }

    #[test]
    fn test_unknown_local_name_only_matches_localhost() {
        let me = HostIdentity::new("");
        assert!(me.matches("localhost"));
        assert!(!me.matches("anything"));
    }

    #[test]
    fn test_detect_does_not_panic() {
        let me = HostIdentity::detect();
        assert!(me.matches(me.name()));
    }
}
