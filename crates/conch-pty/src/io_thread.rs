//! Per-session OS threads: one reads PTY output, one writes input, one waits
//! for the child.
//!
//! PTY reads, PTY writes and `wait()` all block, so each live session gets
//! its own threads and no session's I/O can hold up another's, or its own
//! teardown.

use std::io::{self, Read, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use conch_osc::{DirectoryTracker, Osc7Parser, Osc7Status};
use portable_pty::Child;
use tokio::sync::mpsc;

use crate::events::SessionEvent;
use crate::monitor::{ExitNotice, LifecycleMonitor, LifecycleState};
use crate::registry::Registry;
use crate::session::SessionId;

/// How long the waiter lets the reader drain output after the child exits,
/// so `Exited` follows the last `Output` for that session.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Input chunks a session may have queued before writes are refused.
pub(crate) const INPUT_QUEUE_DEPTH: usize = 256;

/// Queue of input chunks consumed by a session's writer thread.
pub(crate) type InputSender = std_mpsc::SyncSender<Vec<u8>>;

pub(crate) fn input_channel() -> (InputSender, std_mpsc::Receiver<Vec<u8>>) {
    std_mpsc::sync_channel(INPUT_QUEUE_DEPTH)
}

pub(crate) struct ReaderContext {
    pub id: SessionId,
    pub reader: Box<dyn Read + Send>,
    pub stop_rx: mpsc::Receiver<()>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub registry: Arc<Registry>,
    pub tracker: Arc<DirectoryTracker<SessionId>>,
    pub osc7_enabled: bool,
    pub buffer_size: usize,
    /// Dropped when the read loop ends.
    pub drained: std_mpsc::Sender<()>,
}

pub(crate) struct WriterContext {
    pub id: SessionId,
    pub writer: Box<dyn Write + Send>,
    pub input: std_mpsc::Receiver<Vec<u8>>,
}

pub(crate) struct WaiterContext {
    pub id: SessionId,
    pub child: Box<dyn Child + Send + Sync>,
    pub registry: Arc<Registry>,
    pub monitor: Arc<LifecycleMonitor>,
    pub close_after_exit: bool,
    pub drained: std_mpsc::Receiver<()>,
}

/// Start the read loop for a session on a dedicated OS thread.
pub(crate) fn start_reader_thread(ctx: ReaderContext) -> io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-io-{}", ctx.id))
        .spawn(move || read_loop(ctx))
        .map(|_| ())
}

/// Start the thread that feeds queued input to the PTY.
///
/// It ends once every sender is gone and the queue is drained, or at the
/// first failed write.
pub(crate) fn start_writer_thread(ctx: WriterContext) -> io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-write-{}", ctx.id))
        .spawn(move || write_loop(ctx))
        .map(|_| ())
}

/// Start the thread that blocks on the child's exit.
pub(crate) fn start_waiter_thread(ctx: WaiterContext) -> io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-wait-{}", ctx.id))
        .spawn(move || wait_loop(ctx))
        .map(|_| ())
}

fn stop_requested(stop_rx: &mut mpsc::Receiver<()>) -> bool {
    // A dropped sender means the child exited: keep draining until EOF.
    matches!(stop_rx.try_recv(), Ok(()))
}

fn read_loop(mut ctx: ReaderContext) {
    let id = ctx.id;
    let mut parser = Osc7Parser::new();
    let mut buf = vec![0u8; ctx.buffer_size];

    loop {
        if stop_requested(&mut ctx.stop_rx) {
            break;
        }

        // Blocks until data arrives or every slave descriptor is closed.
        let n = match ctx.reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break, // EIO once the child side is gone
        };

        if stop_requested(&mut ctx.stop_rx) {
            break;
        }

        let data = &buf[..n];
        if ctx
            .events
            .send(SessionEvent::Output {
                id,
                data: data.to_vec(),
            })
            .is_err()
        {
            break;
        }

        if ctx.osc7_enabled {
            track_directories(&ctx, &mut parser, data);
        }
    }
    log::debug!("session {id}: reader finished");
}

fn track_directories(ctx: &ReaderContext, parser: &mut Osc7Parser, data: &[u8]) {
    let id = ctx.id;
    for event in parser.feed(data).events {
        match &event.status {
            Osc7Status::Success => {
                let changed = ctx
                    .registry
                    .while_live(id, || ctx.tracker.on_event(id, &event))
                    .flatten();
                if let Some(state) = changed {
                    let _ = ctx.events.send(SessionEvent::DirectoryChanged { id, state });
                }
            }
            Osc7Status::Partial => {}
            Osc7Status::Failed(e) => log::debug!("session {id}: discarded OSC7 sequence: {e}"),
        }
    }
}

fn write_loop(mut ctx: WriterContext) {
    let id = ctx.id;
    for data in ctx.input.iter() {
        let written = ctx
            .writer
            .write_all(&data)
            .and_then(|()| ctx.writer.flush());
        if let Err(e) = written {
            // A broken pipe surfaces as the child's exit, not here.
            log::warn!("session {id}: input write failed: {e}");
            break;
        }
    }
    log::debug!("session {id}: writer finished");
}

fn wait_loop(mut ctx: WaiterContext) {
    let id = ctx.id;
    let exit_code = match ctx.child.wait() {
        Ok(status) => Some(status.exit_code()),
        Err(e) => {
            log::warn!("session {id}: failed to wait for child: {e}");
            None
        }
    };

    if !ctx.registry.mark_exited(id, exit_code) {
        log::debug!("session {id}: process ended after close");
        return;
    }
    ctx.monitor.advance(id, LifecycleState::Exited);

    let _ = ctx.drained.recv_timeout(DRAIN_TIMEOUT);
    ctx.monitor.notify_exit(ExitNotice {
        id,
        exit_code,
        close_after_exit: ctx.close_after_exit,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_keeps_input_order_and_drains_on_close() {
        let sink = Sink::default();
        let (tx, rx) = input_channel();
        for chunk in [&b"ab"[..], b"cd", b"ef"] {
            tx.try_send(chunk.to_vec()).unwrap();
        }
        drop(tx);

        // Runs to completion: the queue was closed after three chunks.
        write_loop(WriterContext {
            id: 1,
            writer: Box::new(sink.clone()),
            input: rx,
        });
        assert_eq!(sink.0.lock().as_slice(), b"abcdef");
    }

    #[test]
    fn test_failed_write_stops_the_writer() {
        let (tx, rx) = input_channel();
        tx.try_send(b"lost".to_vec()).unwrap();
        start_writer_thread(WriterContext {
            id: 2,
            writer: Box::new(Broken),
            input: rx,
        })
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tx.try_send(b"x".to_vec()) {
                Err(std_mpsc::TrySendError::Disconnected(_)) => break,
                _ if std::time::Instant::now() > deadline => panic!("writer thread still running"),
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }
}
