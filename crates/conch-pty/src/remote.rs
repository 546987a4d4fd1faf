//! Remote endpoints for ssh and sftp sessions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerminalError};
use crate::ssh_config::SshConfig;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Where a remote session connects to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// Directory to start in on the remote side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_dir: Option<String>,
    /// Local port forwards opened with the ssh connection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwards: Vec<PortForward>,
}

/// A local port forward, `ssh -L [bind:]port:host:hostport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    #[serde(default = "default_bind_host")]
    pub local_host: String,
    pub local_port: u16,
    /// Host reached from the remote side. The endpoint's own host when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    pub remote_port: u16,
}

fn default_bind_host() -> String {
    "localhost".to_string()
}

impl PortForward {
    pub fn new(local_port: u16, remote_host: Option<String>, remote_port: u16) -> Self {
        Self {
            local_host: default_bind_host(),
            local_port,
            remote_host,
            remote_port,
        }
    }

    /// Parse `[bind:]port:host:hostport`, as `ssh -L` takes it.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.trim().split(':').collect();
        let (bind, rest) = match parts.as_slice() {
            [port, host, hostport] => (None, [*port, *host, *hostport]),
            [bind, port, host, hostport] => (Some(*bind), [*port, *host, *hostport]),
            _ => {
                return Err(invalid(format!(
                    "port forward '{spec}' must be [bind:]port:host:hostport"
                )))
            }
        };
        let [port, host, hostport] = rest;
        let forward = Self {
            local_host: bind.map_or_else(default_bind_host, str::to_string),
            local_port: parse_port(port)?,
            remote_host: Some(host.to_string()),
            remote_port: parse_port(hostport)?,
        };
        forward.validate()?;
        Ok(forward)
    }

    fn validate(&self) -> Result<()> {
        if self.local_port == 0 || self.remote_port == 0 {
            return Err(invalid("forwarded ports must be between 1 and 65535".into()));
        }
        let hosts = std::iter::once(&self.local_host).chain(self.remote_host.as_ref());
        for host in hosts {
            if host.is_empty() || host.starts_with('-') || host.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(invalid(format!("invalid forward host '{host}'")));
            }
        }
        Ok(())
    }

    /// The `-L` argument, with `default_host` standing in for an unset
    /// remote host.
    pub fn spec(&self, default_host: &str) -> String {
        let host = self.remote_host.as_deref().unwrap_or(default_host);
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        format!(
            "{}:{}:{host}:{}",
            self.local_host, self.local_port, self.remote_port
        )
    }
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parse a `[user@]host[:port]` target. IPv6 hosts with a port are
    /// written `[addr]:port`.
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        let (user, rest) = match target.rsplit_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, target),
        };
        if user == Some("") {
            return Err(invalid(format!("empty user in '{target}'")));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid(format!("unclosed '[' in '{target}'")))?;
            let port = match after {
                "" => None,
                _ => Some(
                    after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid(format!("unexpected '{after}' in '{target}'")))?,
                ),
            };
            (host, port)
        } else if rest.matches(':').count() > 1 {
            // Bare IPv6 address, no port.
            (rest, None)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        let port = port.map(parse_port).transpose()?;
        let endpoint = Self {
            host: host.to_string(),
            user: user.map(str::to_string),
            port,
            ..Self::default()
        };
        endpoint.validate_host()?;
        Ok(endpoint)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Check the metadata before anything is spawned for it.
    pub fn validate(&self) -> Result<()> {
        self.validate_host()?;
        if self.port == Some(0) {
            return Err(invalid("port must be between 1 and 65535".into()));
        }
        if let Some(user) = &self.user {
            if user.is_empty() || user.starts_with('-') || user.chars().any(char::is_whitespace) {
                return Err(invalid(format!("invalid user '{user}'")));
            }
        }
        for forward in &self.forwards {
            forward.validate()?;
        }
        if let Some(key) = &self.identity_file {
            let key = expand_tilde(key);
            if !key.is_file() {
                return Err(invalid(format!(
                    "identity file {} does not exist",
                    key.display()
                )));
            }
        }
        Ok(())
    }

    fn validate_host(&self) -> Result<()> {
        let host = &self.host;
        if host.is_empty() {
            return Err(invalid("host must not be empty".into()));
        }
        if host.starts_with('-') {
            return Err(invalid(format!("invalid host '{host}'")));
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%');
        if !host.chars().all(allowed) {
            return Err(invalid(format!("invalid host '{host}'")));
        }
        Ok(())
    }

    /// `user@host` or `host`, as ssh takes it.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// sftp target, with the start directory appended when set.
    pub fn sftp_target(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut target = match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host,
        };
        if let Some(dir) = &self.remote_dir {
            target.push(':');
            target.push_str(dir);
        }
        target
    }

    /// Fill unset fields from a matching ssh_config `Host` entry.
    pub fn resolve_alias(mut self, config: &SshConfig) -> Self {
        let Some(entry) = config.lookup(&self.host) else {
            return self;
        };
        log::debug!("resolved ssh alias '{}' from ssh_config", self.host);
        if self.user.is_none() {
            self.user = entry.user.clone();
        }
        if self.port.is_none() {
            self.port = entry.port;
        }
        if self.identity_file.is_none() {
            self.identity_file = entry.identity_file.clone();
        }
        if let Some(hostname) = &entry.hostname {
            self.host = hostname.clone();
        }
        self
    }

    /// Short label for tab titles.
    pub fn label(&self) -> String {
        match self.port {
            Some(port) if port != DEFAULT_SSH_PORT => format!("{}:{port}", self.destination()),
            _ => self.destination(),
        }
    }
}

fn parse_port(text: &str) -> Result<u16> {
    match text.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => Err(invalid(format!(
            "port '{text}' must be a number between 1 and 65535"
        ))),
    }
}

fn invalid(reason: String) -> TerminalError {
    TerminalError::InvalidConnection(reason)
}

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_host_port() {
        let ep = RemoteEndpoint::parse("alice@example.com:2222").unwrap();
        assert_eq!(ep.user.as_deref(), Some("alice"));
        assert_eq!(ep.host, "example.com");
        assert_eq!(ep.port(), 2222);
    }

    #[test]
    fn test_parse_host_only_defaults_port() {
        let ep = RemoteEndpoint::parse("buildbox").unwrap();
        assert_eq!(ep.user, None);
        assert_eq!(ep.port, None);
        assert_eq!(ep.port(), 22);
        assert_eq!(ep.destination(), "buildbox");
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = RemoteEndpoint::parse("root@[fe80::1]:2200").unwrap();
        assert_eq!(ep.host, "fe80::1");
        assert_eq!(ep.port(), 2200);

        let bare = RemoteEndpoint::parse("::1").unwrap();
        assert_eq!(bare.host, "::1");
        assert_eq!(bare.port, None);
        assert_eq!(bare.sftp_target(), "[::1]");
    }

    #[test]
    fn test_parse_rejects_bad_targets() {
        for target in ["", "@host", "host:0", "host:70000", "host:ssh", "[::1", "-oProxyCommand=x", "a b"] {
            assert!(
                matches!(
                    RemoteEndpoint::parse(target),
                    Err(TerminalError::InvalidConnection(_))
                ),
                "accepted {target:?}"
            );
        }
    }

    #[test]
    fn test_validate_identity_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");

        let mut ep = RemoteEndpoint::new("host");
        ep.identity_file = Some(key.clone());
        assert!(ep.validate().is_err());

        std::fs::write(&key, "key").unwrap();
        assert!(ep.validate().is_ok());
    }

    #[test]
    fn test_validate_port_and_user() {
        let mut ep = RemoteEndpoint::new("host");
        ep.port = Some(0);
        assert!(ep.validate().is_err());

        let mut ep = RemoteEndpoint::new("host");
        ep.user = Some("-l".into());
        assert!(ep.validate().is_err());

        assert!(RemoteEndpoint::new("").validate().is_err());
    }

    #[test]
    fn test_sftp_target_with_dir() {
        let mut ep = RemoteEndpoint::parse("bob@files:2022").unwrap();
        ep.remote_dir = Some("/srv/data".into());
        assert_eq!(ep.sftp_target(), "bob@files:/srv/data");
        assert_eq!(ep.label(), "bob@files:2022");
    }

    #[test]
    fn test_resolve_alias_fills_unset_fields() {
        let config = SshConfig::parse(
            "Host web\n  HostName web01.example.com\n  User deploy\n  Port 2201\n",
            Path::new("/"),
        );
        let ep = RemoteEndpoint::parse("web").unwrap().resolve_alias(&config);
        assert_eq!(ep.host, "web01.example.com");
        assert_eq!(ep.user.as_deref(), Some("deploy"));
        assert_eq!(ep.port(), 2201);

        let explicit = RemoteEndpoint::parse("root@web:22").unwrap().resolve_alias(&config);
        assert_eq!(explicit.user.as_deref(), Some("root"));
        assert_eq!(explicit.port(), 22);
        assert_eq!(explicit.host, "web01.example.com");

        let unknown = RemoteEndpoint::parse("db").unwrap().resolve_alias(&config);
        assert_eq!(unknown.host, "db");
    }

    #[test]
    fn test_port_forward_specs() {
        let fwd = PortForward::parse("8080:db.internal:5432").unwrap();
        assert_eq!(fwd.local_host, "localhost");
        assert_eq!(fwd.spec("ignored"), "localhost:8080:db.internal:5432");

        let fwd = PortForward::parse("0.0.0.0:9000:localhost:80").unwrap();
        assert_eq!(fwd.spec("host"), "0.0.0.0:9000:localhost:80");

        let fwd = PortForward::new(3000, None, 3000);
        assert_eq!(fwd.spec("web01"), "localhost:3000:web01:3000");
        assert_eq!(fwd.spec("fe80::1"), "localhost:3000:[fe80::1]:3000");

        for spec in ["8080", "8080:db", "0:db:1", "80:db:70000", "80:-oProxy:1", "a:b:c:d:e"] {
            assert!(PortForward::parse(spec).is_err(), "accepted {spec:?}");
        }
    }

    #[test]
    fn test_validate_checks_forwards() {
        let mut ep = RemoteEndpoint::new("host");
        ep.forwards.push(PortForward::new(0, None, 80));
        assert!(matches!(
            ep.validate(),
            Err(TerminalError::InvalidConnection(_))
        ));
        ep.forwards[0].local_port = 8080;
        assert!(ep.validate().is_ok());
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/.ssh/id")), home.join(".ssh/id"));
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(expand_tilde(Path::new("/etc")), PathBuf::from("/etc"));
        assert_eq!(expand_tilde(Path::new("~bob/x")), PathBuf::from("~bob/x"));
    }
}
