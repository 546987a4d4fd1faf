use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use conch_pty::{LaunchRequest, PortForward};

/// Command-line arguments for conch
#[derive(Parser, Debug)]
#[command(name = "conch")]
#[command(about = "Run a shell, command, ssh or sftp session on a pseudo-terminal")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Start in DIR (the remote directory for --ssh/--sftp)
    #[arg(short = 'w', long = "working-directory", value_name = "DIR")]
    pub working_directory: Option<PathBuf>,

    /// Connect to [user@]host[:port] with ssh
    #[arg(long, value_name = "TARGET", conflicts_with = "sftp")]
    pub ssh: Option<String>,

    /// Connect to [user@]host[:port] with sftp
    #[arg(long, value_name = "TARGET")]
    pub sftp: Option<String>,

    /// Identity file for --ssh/--sftp
    #[arg(short = 'i', long, value_name = "KEY")]
    pub identity: Option<PathBuf>,

    /// Forward a local port over --ssh: [bind:]port:host:hostport
    #[arg(short = 'L', long = "forward", value_name = "SPEC")]
    pub forward: Vec<String>,

    /// Exit once the command given with -e finishes
    #[arg(long, requires = "execute")]
    pub close_after_execute: bool,

    /// Read configuration from FILE instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Start in DIR (same as -w)
    #[arg(value_name = "DIR", conflicts_with = "working_directory")]
    pub dir: Option<PathBuf>,

    /// Run CMD; everything after -e is part of the command
    #[arg(
        short = 'e',
        long = "execute",
        value_name = "CMD",
        num_args = 1..,
        allow_hyphen_values = true
    )]
    pub execute: Vec<String>,
}

impl Cli {
    pub fn launch_request(&self) -> Result<LaunchRequest> {
        let dir = self.working_directory.clone().or_else(|| self.dir.clone());
        let command = (!self.execute.is_empty()).then(|| self.execute.join(" "));
        let remote_dir = dir.as_ref().map(|d| d.to_string_lossy().into_owned());

        if let Some(target) = &self.ssh {
            let forwards = self
                .forward
                .iter()
                .map(|spec| PortForward::parse(spec))
                .collect::<conch_pty::Result<Vec<_>>>()?;
            return Ok(LaunchRequest::Ssh {
                target: target.clone(),
                identity_file: self.identity.clone(),
                remote_dir,
                command,
                close_after_execute: self.close_after_execute,
                forwards,
            });
        }
        if !self.forward.is_empty() {
            bail!("-L only applies to --ssh sessions");
        }
        if let Some(target) = &self.sftp {
            if command.is_some() {
                bail!("-e cannot be combined with --sftp");
            }
            return Ok(LaunchRequest::Sftp {
                target: target.clone(),
                identity_file: self.identity.clone(),
                remote_dir,
            });
        }
        if self.identity.is_some() {
            bail!("-i only applies to --ssh and --sftp sessions");
        }
        Ok(LaunchRequest::Local {
            working_dir: dir,
            command,
            close_after_execute: self.close_after_execute,
        })
    }
}
