mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use conch_osc::DirectoryState;
use conch_pty::{SessionEvent, SessionId, TerminalConfig, TerminalHost};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let request = cli.launch_request()?;
    let config = match &cli.config {
        Some(path) => TerminalConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TerminalConfig::load_or_default(None),
    };

    let (host, mut events) = TerminalHost::new(config);
    let host = Arc::new(host);
    let id = host.launch(request).context("failed to open session")?;

    tokio::spawn(pump_stdin(Arc::clone(&host), id));

    let mut stdout = tokio::io::stdout();
    let exit_code = loop {
        let Some(event) = events.recv().await else {
            break None;
        };
        if event.session_id() != id {
            continue;
        }
        match event {
            SessionEvent::Output { data, .. } => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            SessionEvent::DirectoryChanged { state, .. } => log_directory(id, &state),
            SessionEvent::Exited { exit_code, .. } => break exit_code,
            SessionEvent::CloseRequested { .. } => {}
        }
    };

    host.shutdown();
    let code = exit_code.and_then(|c| i32::try_from(c).ok()).unwrap_or(1);
    std::process::exit(code);
}

/// Forward stdin to the session until either side goes away.
async fn pump_stdin(host: Arc<TerminalHost>, id: SessionId) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if let Err(e) = host.write_input(id, &buf[..n]) {
            log::debug!("stdin pump stopped: {e}");
            break;
        }
    }
}

fn log_directory(id: SessionId, state: &DirectoryState) {
    log::info!("session {id} now in {}", state.title(true));
}
