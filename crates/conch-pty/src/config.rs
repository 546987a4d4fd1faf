//! Terminal configuration, read from `<config dir>/conch/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerminalError};
use crate::pty::Geometry;

const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell for local sessions. `$SHELL`, then `/bin/sh`, when unset.
    pub shell: Option<String>,
    /// Value of `TERM` in every child.
    pub term: String,
    /// Track directories announced through OSC7.
    pub osc7_enabled: bool,
    /// Install a prompt hook that announces the directory: `PROMPT_COMMAND`
    /// for bash, a `precmd` function in a generated `ZDOTDIR` for zsh.
    pub osc7_prompt_hook: bool,
    /// Start interactive local shells as login shells (`-l`).
    pub login_shell: bool,
    pub default_rows: u16,
    pub default_cols: u16,
    /// Size of each PTY read.
    pub read_buffer_size: usize,
    pub extra_env: BTreeMap<String, String>,
    pub ssh: SshOptions,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            term: "xterm-256color".to_string(),
            osc7_enabled: true,
            osc7_prompt_hook: true,
            login_shell: false,
            default_rows: 24,
            default_cols: 80,
            read_buffer_size: 64 * 1024,
            extra_env: BTreeMap::new(),
            ssh: SshOptions::default(),
        }
    }
}

/// Options passed to the external ssh/sftp programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOptions {
    pub connect_timeout: u32,
    pub server_alive_interval: u32,
    pub server_alive_count_max: u32,
    pub strict_host_key_checking: String,
    pub ssh_program: String,
    pub sftp_program: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            server_alive_interval: 30,
            server_alive_count_max: 3,
            strict_host_key_checking: "ask".to_string(),
            ssh_program: "ssh".to_string(),
            sftp_program: "sftp".to_string(),
        }
    }
}

impl SshOptions {
    /// `-o` options in a stable order.
    pub fn as_options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ConnectTimeout", self.connect_timeout.to_string()),
            ("ServerAliveInterval", self.server_alive_interval.to_string()),
            ("ServerAliveCountMax", self.server_alive_count_max.to_string()),
            (
                "StrictHostKeyChecking",
                self.strict_host_key_checking.clone(),
            ),
        ]
    }
}

impl TerminalConfig {
    /// `<config dir>/conch/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("conch").join("config.json"))
    }

    /// Read `path`. A missing file yields defaults; anything else that goes
    /// wrong is a `Config` error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TerminalError::Config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            TerminalError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`TerminalConfig::load`] on `path` (or the default location),
    /// but falls back to defaults on error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Self::default(),
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{e}; using default configuration");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.default_geometry().is_valid() {
            return Err(TerminalError::Config(format!(
                "default geometry {}x{} must be non-zero",
                self.default_rows, self.default_cols
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(TerminalError::Config(
                "read_buffer_size must be non-zero".into(),
            ));
        }
        if self.term.is_empty() {
            return Err(TerminalError::Config("term must not be empty".into()));
        }
        Ok(())
    }

    /// Shell used for local sessions.
    pub fn shell_path(&self) -> String {
        self.shell
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| FALLBACK_SHELL.to_string())
    }

    pub fn default_geometry(&self) -> Geometry {
        Geometry::new(self.default_rows, self.default_cols)
    }
}
