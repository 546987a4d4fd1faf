//! Launch requests as a front end expresses them.

use std::path::PathBuf;

use crate::error::Result;
use crate::remote::{PortForward, RemoteEndpoint};
use crate::session::SessionKind;
use crate::spawner::SpawnParams;
use crate::ssh_config::SshConfig;

/// One way of opening a session: a local directory, a command, or a remote
/// endpoint given as `user@host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRequest {
    Local {
        working_dir: Option<PathBuf>,
        command: Option<String>,
        close_after_execute: bool,
    },
    Ssh {
        target: String,
        identity_file: Option<PathBuf>,
        remote_dir: Option<String>,
        command: Option<String>,
        close_after_execute: bool,
        /// Local port forwards (`ssh -L`).
        forwards: Vec<PortForward>,
    },
    Sftp {
        target: String,
        identity_file: Option<PathBuf>,
        remote_dir: Option<String>,
    },
}

impl LaunchRequest {
    /// Interactive shell in `dir`.
    pub fn local_in(dir: impl Into<PathBuf>) -> Self {
        LaunchRequest::Local {
            working_dir: Some(dir.into()),
            command: None,
            close_after_execute: false,
        }
    }

    /// Run `command` in the default shell, optionally closing when it ends.
    pub fn execute(command: impl Into<String>, close_after_execute: bool) -> Self {
        LaunchRequest::Local {
            working_dir: None,
            command: Some(command.into()),
            close_after_execute,
        }
    }

    pub fn ssh(target: impl Into<String>) -> Self {
        LaunchRequest::Ssh {
            target: target.into(),
            identity_file: None,
            remote_dir: None,
            command: None,
            close_after_execute: false,
            forwards: Vec::new(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            LaunchRequest::Local { .. } => SessionKind::Local,
            LaunchRequest::Ssh { .. } => SessionKind::Ssh,
            LaunchRequest::Sftp { .. } => SessionKind::Sftp,
        }
    }

    /// Resolve into spawn parameters. Remote targets are parsed, expanded
    /// through `ssh_config` aliases, and validated.
    pub fn into_spawn(self, ssh_config: &SshConfig) -> Result<(SessionKind, SpawnParams)> {
        let kind = self.kind();
        let params = match self {
            LaunchRequest::Local {
                working_dir,
                command,
                close_after_execute,
            } => SpawnParams {
                working_dir,
                command,
                close_after_execute,
                ..SpawnParams::default()
            },
            LaunchRequest::Ssh {
                target,
                identity_file,
                remote_dir,
                command,
                close_after_execute,
                forwards,
            } => SpawnParams {
                command,
                close_after_execute,
                remote: Some(endpoint(&target, identity_file, remote_dir, forwards, ssh_config)?),
                ..SpawnParams::default()
            },
            LaunchRequest::Sftp {
                target,
                identity_file,
                remote_dir,
            } => SpawnParams {
                remote: Some(endpoint(&target, identity_file, remote_dir, Vec::new(), ssh_config)?),
                ..SpawnParams::default()
            },
        };
        Ok((kind, params))
    }
}

fn endpoint(
    target: &str,
    identity_file: Option<PathBuf>,
    remote_dir: Option<String>,
    forwards: Vec<PortForward>,
    ssh_config: &SshConfig,
) -> Result<RemoteEndpoint> {
    let mut endpoint = RemoteEndpoint::parse(target)?;
    endpoint.identity_file = identity_file;
    endpoint.remote_dir = remote_dir;
    endpoint.forwards = forwards;
    let endpoint = endpoint.resolve_alias(ssh_config);
    endpoint.validate()?;
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerminalError;
    use std::path::Path;

    #[test]
    fn test_local_requests() {
        let (kind, params) = LaunchRequest::local_in("/tmp")
            .into_spawn(&SshConfig::default())
            .unwrap();
        assert_eq!(kind, SessionKind::Local);
        assert_eq!(params.working_dir, Some(PathBuf::from("/tmp")));
        assert!(params.command.is_none());

        let (_, params) = LaunchRequest::execute("ls -la", true)
            .into_spawn(&SshConfig::default())
            .unwrap();
        assert_eq!(params.command.as_deref(), Some("ls -la"));
        assert!(params.close_after_execute);
    }

    #[test]
    fn test_ssh_request_resolves_alias() {
        let config = SshConfig::parse("Host prod\n HostName prod.example.com\n User ops\n", Path::new("/"));
        let (kind, params) = LaunchRequest::ssh("prod").into_spawn(&config).unwrap();
        assert_eq!(kind, SessionKind::Ssh);
        let remote = params.remote.unwrap();
        assert_eq!(remote.host, "prod.example.com");
        assert_eq!(remote.user.as_deref(), Some("ops"));
    }

    #[test]
    fn test_ssh_request_carries_forwards() {
        let request = LaunchRequest::Ssh {
            target: "db".into(),
            identity_file: None,
            remote_dir: None,
            command: None,
            close_after_execute: false,
            forwards: vec![PortForward::new(5432, None, 5432)],
        };
        let (_, params) = request.into_spawn(&SshConfig::default()).unwrap();
        assert_eq!(params.remote.unwrap().forwards, vec![PortForward::new(5432, None, 5432)]);

        let bad = LaunchRequest::Ssh {
            target: "db".into(),
            identity_file: None,
            remote_dir: None,
            command: None,
            close_after_execute: false,
            forwards: vec![PortForward::new(0, None, 22)],
        };
        assert!(matches!(
            bad.into_spawn(&SshConfig::default()),
            Err(TerminalError::InvalidConnection(_))
        ));
    }

    #[test]
    fn test_sftp_request_keeps_remote_dir() {
        let request = LaunchRequest::Sftp {
            target: "u@h:2200".into(),
            identity_file: None,
            remote_dir: Some("/pub".into()),
        };
        let (kind, params) = request.into_spawn(&SshConfig::default()).unwrap();
        assert_eq!(kind, SessionKind::Sftp);
        let remote = params.remote.unwrap();
        assert_eq!(remote.port(), 2200);
        assert_eq!(remote.remote_dir.as_deref(), Some("/pub"));
    }

    #[test]
    fn test_bad_target_or_key_is_invalid_connection() {
        let err = LaunchRequest::ssh("user@:22")
            .into_spawn(&SshConfig::default())
            .unwrap_err();
        assert!(matches!(err, TerminalError::InvalidConnection(_)));

        let request = LaunchRequest::Ssh {
            target: "host".into(),
            identity_file: Some("/nonexistent/key".into()),
            remote_dir: None,
            command: None,
            close_after_execute: false,
            forwards: Vec::new(),
        };
        assert!(matches!(
            request.into_spawn(&SshConfig::default()),
            Err(TerminalError::InvalidConnection(_))
        ));
    }
}
