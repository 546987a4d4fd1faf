//! Launching local shells and ssh/sftp wrappers on fresh PTYs.
//!
//! A spawn either registers a complete session (PTY, process, I/O threads)
//! or leaves nothing behind.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use conch_osc::DirectoryTracker;
use portable_pty::CommandBuilder;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::config::TerminalConfig;
use crate::error::{Result, TerminalError};
use crate::events::SessionEvent;
use crate::io_thread::{
    input_channel, start_reader_thread, start_waiter_thread, start_writer_thread, ReaderContext,
    WaiterContext, WriterContext,
};
use crate::monitor::{LifecycleMonitor, LifecycleState};
use crate::pty::{Geometry, PtyHandle};
use crate::registry::Registry;
use crate::remote::{expand_tilde, RemoteEndpoint, DEFAULT_SSH_PORT};
use crate::session::{
    Connection, ProcessHandle, SessionHandles, SessionId, SessionKind, SessionRecord,
};

/// Shell snippet that announces `$PWD` through OSC7.
const OSC7_PROMPT_COMMAND: &str = r#"printf "\033]7;file://%s%s\007" "${HOSTNAME:-$(hostname)}" "$PWD""#;

/// `.zshrc` placed in a temporary `ZDOTDIR`: adds the OSC7 hook, then hands
/// over to the user's own startup files.
const ZSH_OSC7_RC: &str = r#"_conch_osc7() { printf '\033]7;file://%s%s\007' "${HOST:-$(hostname)}" "$PWD"; }
typeset -ga precmd_functions
precmd_functions+=(_conch_osc7)
ZDOTDIR="$HOME"
if [ -f "$HOME/.zshrc" ]; then . "$HOME/.zshrc"; fi
"#;

/// What to launch.
#[derive(Debug, Clone, Default)]
pub struct SpawnParams {
    /// Local start directory. `~` is expanded; `None` means home.
    pub working_dir: Option<PathBuf>,
    /// Run this command instead of an interactive shell.
    pub command: Option<String>,
    /// Close the session as soon as the command's process exits.
    pub close_after_execute: bool,
    /// Required for ssh and sftp sessions.
    pub remote: Option<RemoteEndpoint>,
    pub geometry: Option<Geometry>,
    pub title: Option<String>,
}

/// A fully computed command line, kept separate from `CommandBuilder` so it
/// can be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// `.zshrc` to install in a temporary `ZDOTDIR` for this session.
    pub zshrc: Option<String>,
}

impl CommandPlan {
    /// Write the generated `.zshrc`, if any. A failure only costs directory
    /// tracking, so it is logged and the shell starts without the hook.
    fn install_rc(&self) -> Option<TempDir> {
        let rc = self.zshrc.as_ref()?;
        let installed = tempfile::Builder::new()
            .prefix("conch-zsh-")
            .tempdir()
            .and_then(|dir| std::fs::write(dir.path().join(".zshrc"), rc).map(|()| dir));
        match installed {
            Ok(dir) => {
                log::debug!("zsh OSC7 hook installed in {}", dir.path().display());
                Some(dir)
            }
            Err(e) => {
                log::warn!("failed to set up zsh OSC7 hook: {e}");
                None
            }
        }
    }

    fn into_builder(self, rc_dir: Option<&TempDir>) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.cwd(&self.cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = rc_dir {
            cmd.env("ZDOTDIR", dir.path());
        }
        cmd
    }
}

pub struct Spawner {
    config: Arc<TerminalConfig>,
    registry: Arc<Registry>,
    monitor: Arc<LifecycleMonitor>,
    tracker: Arc<DirectoryTracker<SessionId>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Spawner {
    pub(crate) fn new(
        config: Arc<TerminalConfig>,
        registry: Arc<Registry>,
        monitor: Arc<LifecycleMonitor>,
        tracker: Arc<DirectoryTracker<SessionId>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            monitor,
            tracker,
            events,
        }
    }

    pub fn spawn(&self, kind: SessionKind, params: SpawnParams) -> Result<SessionId> {
        let (plan, connection) = plan_command(&self.config, kind, &params)?;
        let geometry = params
            .geometry
            .unwrap_or_else(|| self.config.default_geometry());
        if !geometry.is_valid() {
            return Err(TerminalError::InvalidConnection(format!(
                "invalid geometry {}x{}",
                geometry.rows, geometry.cols
            )));
        }

        let id = self.registry.allocate_id();
        self.monitor.track(id);
        match self.launch(id, kind, plan, connection, geometry, &params) {
            Ok(()) => {
                self.monitor.advance(id, LifecycleState::Running);
                Ok(id)
            }
            Err(e) => {
                self.monitor.forget(id);
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        id: SessionId,
        kind: SessionKind,
        plan: CommandPlan,
        connection: Connection,
        geometry: Geometry,
        params: &SpawnParams,
    ) -> Result<()> {
        let program = plan.program.clone();
        let mut pty =
            PtyHandle::open(geometry).map_err(|e| TerminalError::ResourceExhausted(e.to_string()))?;
        let spawn_failed = |reason: String| TerminalError::SpawnFailed {
            program: program.clone(),
            reason,
        };

        let reader = pty.take_reader().map_err(|e| spawn_failed(e.to_string()))?;
        let writer = pty.take_writer().map_err(|e| spawn_failed(e.to_string()))?;
        let rc_dir = plan.install_rc();
        let child = pty
            .spawn(plan.into_builder(rc_dir.as_ref()))
            .map_err(|e| spawn_failed(e.to_string()))?;
        let process = ProcessHandle {
            pid: child.process_id(),
            killer: child.clone_killer(),
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();
        let (input_tx, input_rx) = input_channel();
        let title = params
            .title
            .clone()
            .unwrap_or_else(|| default_title(&connection, &program));
        let record = SessionRecord::new(
            id,
            kind,
            connection,
            title,
            params.close_after_execute,
            SessionHandles {
                pty,
                process,
                io_stop: stop_tx,
                input: input_tx,
                rc_dir,
            },
        );
        let pid = record.info().pid;
        self.registry.register(record);

        let started = start_reader_thread(ReaderContext {
            id,
            reader,
            stop_rx,
            events: self.events.clone(),
            registry: Arc::clone(&self.registry),
            tracker: Arc::clone(&self.tracker),
            osc7_enabled: self.config.osc7_enabled,
            buffer_size: self.config.read_buffer_size,
            drained: drained_tx,
        });
        let started = started.and_then(|()| {
            start_writer_thread(WriterContext {
                id,
                writer,
                input: input_rx,
            })
        });
        let started = started.and_then(|()| {
            start_waiter_thread(WaiterContext {
                id,
                child,
                registry: Arc::clone(&self.registry),
                monitor: Arc::clone(&self.monitor),
                close_after_exit: params.close_after_execute,
                drained: drained_rx,
            })
        });
        if let Err(e) = started {
            // Killing the child through the record also lets the reader finish.
            self.registry.unregister(id);
            return Err(spawn_failed(format!("failed to start session threads: {e}")));
        }

        log::info!("session {id} started: {kind} {program} (pid {pid:?})");
        Ok(())
    }
}

/// Compute the command line and connection metadata for a session without
/// launching anything. Validation failures surface here.
pub fn plan_command(
    config: &TerminalConfig,
    kind: SessionKind,
    params: &SpawnParams,
) -> Result<(CommandPlan, Connection)> {
    match kind {
        SessionKind::Local => {
            if params.remote.is_some() {
                return Err(TerminalError::InvalidConnection(
                    "local sessions do not take a remote endpoint".into(),
                ));
            }
            let working_dir = resolve_working_dir(params.working_dir.as_deref())?;
            let plan = local_plan(config, params, &working_dir);
            Ok((plan, Connection::Local { working_dir }))
        }
        SessionKind::Ssh | SessionKind::Sftp => {
            let endpoint = params.remote.clone().ok_or_else(|| {
                TerminalError::InvalidConnection(format!("{kind} session needs a remote endpoint"))
            })?;
            endpoint.validate()?;
            let cwd = resolve_working_dir(None)?;
            let plan = if kind == SessionKind::Ssh {
                ssh_plan(config, params, &endpoint, cwd)
            } else {
                sftp_plan(config, &endpoint, cwd)
            };
            Ok((plan, Connection::Remote(endpoint)))
        }
    }
}

/// Check a requested start directory before anything is launched in it.
pub fn resolve_working_dir(requested: Option<&Path>) -> Result<PathBuf> {
    let path = match requested {
        Some(p) => expand_tilde(p),
        None => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
    };
    let invalid = |reason: &str| TerminalError::InvalidWorkingDirectory {
        path: path.clone(),
        reason: reason.to_string(),
    };

    let meta = std::fs::metadata(&path).map_err(|_| invalid("does not exist"))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory"));
    }
    if !is_searchable(&path) {
        return Err(invalid("permission denied"));
    }
    Ok(path)
}

/// Whether we may `chdir` into `dir`: search (execute) permission, checked
/// against our real ids the way the kernel will check the child's.
fn is_searchable(dir: &Path) -> bool {
    let Ok(c_path) = CString::new(dir.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the whole call.
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

fn base_env(config: &TerminalConfig) -> Vec<(String, String)> {
    let mut env = vec![
        ("TERM".to_string(), config.term.clone()),
        ("COLORTERM".to_string(), "truecolor".to_string()),
        ("TERM_PROGRAM".to_string(), "conch".to_string()),
    ];
    env.extend(config.extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn local_plan(config: &TerminalConfig, params: &SpawnParams, working_dir: &Path) -> CommandPlan {
    let shell = config.shell_path();
    let args = match &params.command {
        Some(command) if params.close_after_execute => vec!["-c".to_string(), command.clone()],
        Some(command) => vec![
            "-c".to_string(),
            format!("{command}; exec {}", shell_words::quote(&shell)),
        ],
        None if config.login_shell => vec!["-l".to_string()],
        None => Vec::new(),
    };

    let mut env = base_env(config);
    let mut zshrc = None;
    if config.osc7_enabled && config.osc7_prompt_hook {
        match Path::new(&shell).file_name().and_then(|n| n.to_str()) {
            Some("bash") => {
                env.push(("PROMPT_COMMAND".to_string(), OSC7_PROMPT_COMMAND.to_string()));
            }
            Some("zsh") => zshrc = Some(ZSH_OSC7_RC.to_string()),
            _ => {}
        }
    }

    CommandPlan {
        program: shell,
        args,
        cwd: working_dir.to_path_buf(),
        env,
        zshrc,
    }
}

fn connection_options(config: &TerminalConfig, args: &mut Vec<String>) {
    for (key, value) in config.ssh.as_options() {
        args.push("-o".to_string());
        args.push(format!("{key}={value}"));
    }
}

fn ssh_plan(
    config: &TerminalConfig,
    params: &SpawnParams,
    endpoint: &RemoteEndpoint,
    cwd: PathBuf,
) -> CommandPlan {
    let mut args = vec!["-t".to_string()];
    connection_options(config, &mut args);
    if !endpoint.forwards.is_empty() {
        args.push("-o".to_string());
        args.push("ExitOnForwardFailure=yes".to_string());
        for forward in &endpoint.forwards {
            args.push("-L".to_string());
            args.push(forward.spec(&endpoint.host));
        }
    }
    if endpoint.port() != DEFAULT_SSH_PORT {
        args.push("-p".to_string());
        args.push(endpoint.port().to_string());
    }
    if let Some(key) = &endpoint.identity_file {
        args.push("-i".to_string());
        args.push(expand_tilde(key).to_string_lossy().into_owned());
    }
    args.push(endpoint.destination());
    args.push(remote_command(config, params, endpoint));

    CommandPlan {
        program: config.ssh.ssh_program.clone(),
        args,
        cwd,
        env: base_env(config),
        zshrc: None,
    }
}

/// The command ssh runs on the far side.
fn remote_command(config: &TerminalConfig, params: &SpawnParams, endpoint: &RemoteEndpoint) -> String {
    let mut parts = Vec::new();
    if let Some(dir) = &endpoint.remote_dir {
        parts.push(format!("cd {}", remote_dir_arg(dir)));
    }
    match &params.command {
        Some(command) if params.close_after_execute => {
            parts.push(command.clone());
            return parts.join("; ");
        }
        Some(command) => parts.push(command.clone()),
        None => {}
    }
    if config.osc7_enabled && config.osc7_prompt_hook {
        parts.push(format!(
            "export PROMPT_COMMAND={}",
            shell_words::quote(OSC7_PROMPT_COMMAND)
        ));
    }
    parts.push(r#"exec "$SHELL" -l"#.to_string());
    parts.join("; ")
}

fn sftp_plan(config: &TerminalConfig, endpoint: &RemoteEndpoint, cwd: PathBuf) -> CommandPlan {
    let mut args = Vec::new();
    connection_options(config, &mut args);
    if endpoint.port() != DEFAULT_SSH_PORT {
        args.push("-P".to_string());
        args.push(endpoint.port().to_string());
    }
    if let Some(key) = &endpoint.identity_file {
        args.push("-i".to_string());
        args.push(expand_tilde(key).to_string_lossy().into_owned());
    }
    args.push(endpoint.sftp_target());

    CommandPlan {
        program: config.ssh.sftp_program.clone(),
        args,
        cwd,
        env: base_env(config),
        zshrc: None,
    }
}

/// Quote a remote start directory, leaving a leading `~` for the remote
/// shell to expand.
fn remote_dir_arg(dir: &str) -> String {
    match dir.strip_prefix('~') {
        Some("") => "~".to_string(),
        Some(rest) if rest.starts_with('/') => {
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                "~/".to_string()
            } else {
                format!("~/{}", shell_words::quote(rest))
            }
        }
        _ => shell_words::quote(dir).into_owned(),
    }
}

fn default_title(connection: &Connection, program: &str) -> String {
    match connection {
        Connection::Local { working_dir } => {
            let name = Path::new(program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.to_string());
            format!("{name}: {}", working_dir.display())
        }
        Connection::Remote(endpoint) => endpoint.label(),
    }
}
