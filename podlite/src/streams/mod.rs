//! Per-container stream multiplexer.
//!
//! A [`Stream`] owns the selectable stdin source of one container process
//! and fans its stdout/stderr out to any number of registered consumers:
//! interactive attach writers, CRI log file writers, and pull-based pipe
//! endpoints feeding the log copier. The stream is inert until
//! [`Stream::copy_pipes`] binds it to the process-side raw endpoints.

mod registry;

pub use registry::{OutputWriter, WriterKey};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, duplex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::errors::{PodliteError, PodliteResult};
use registry::WriterRegistry;

/// Chunk size for the stdout/stderr pump loops.
const COPY_BUFFER: usize = 32 * 1024;

/// Buffer capacity of in-process pipes (stdin and pull-based endpoints).
const PIPE_BUFFER: usize = 64 * 1024;

/// Process-side raw pipe endpoints handed to [`Stream::copy_pipes`].
pub struct Pipes {
    /// Write side of the process's stdin. Absent for non-interactive
    /// containers.
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

enum StdinSource {
    /// Attach clients write into `client`; `pump` is copied into the
    /// process stdin once the stream is bound.
    Interactive {
        client: Option<DuplexStream>,
        pump: Option<DuplexStream>,
    },
    /// The process sees end-of-input immediately.
    Discard,
}

/// Fan-out multiplexer for one container process's standard streams.
///
/// Exactly one stdin source is active at a time. A writer registered at
/// time T receives every byte emitted from T onward, in emission order,
/// independent of other writers.
pub struct Stream {
    stdin: Mutex<StdinSource>,
    stdout: Arc<WriterRegistry>,
    stderr: Arc<WriterRegistry>,
    /// Tracks the pump loops and every sink drain task of the current
    /// session. Kept closed so `wait` resolves as soon as it is empty.
    tracker: TaskTracker,
    shutdown: Mutex<CancellationToken>,
    sink_err: Arc<Mutex<Option<PodliteError>>>,
    /// Latched by the first `close` of a session; cleared when a new
    /// session is armed.
    closed: AtomicBool,
}

impl Stream {
    pub fn new() -> Self {
        let sink_err = Arc::new(Mutex::new(None));
        let tracker = TaskTracker::new();
        tracker.close();

        Self {
            stdin: Mutex::new(StdinSource::Discard),
            stdout: Arc::new(WriterRegistry::new("stdout", Arc::clone(&sink_err))),
            stderr: Arc::new(WriterRegistry::new("stderr", Arc::clone(&sink_err))),
            tracker,
            shutdown: Mutex::new(CancellationToken::new()),
            sink_err,
            closed: AtomicBool::new(false),
        }
    }

    /// Installs an interactive stdin source, replacing the current one,
    /// and rearms the writer sets for a new session.
    pub fn new_stdin_input(&self) {
        let (client, pump) = duplex(PIPE_BUFFER);
        *self.stdin.lock() = StdinSource::Interactive {
            client: Some(client),
            pump: Some(pump),
        };
        self.stdout.rearm();
        self.stderr.rearm();
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Installs a stdin source that signals end-of-input immediately,
    /// and rearms the writer sets for a new session.
    pub fn new_discard_stdin_input(&self) {
        *self.stdin.lock() = StdinSource::Discard;
        self.stdout.rearm();
        self.stderr.rearm();
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Hands out the client-side stdin write half, once per installed
    /// interactive source. `None` in discard mode or when already taken.
    pub fn stdin_writer(&self) -> Option<DuplexStream> {
        match &mut *self.stdin.lock() {
            StdinSource::Interactive { client, .. } => client.take(),
            StdinSource::Discard => None,
        }
    }

    /// Registers an additional stdout sink. Safe to call while delivery is
    /// active; the sink sees every chunk broadcast from now on.
    pub fn add_stdout_writer(&self, w: OutputWriter) -> WriterKey {
        self.stdout.add(w, &self.tracker)
    }

    /// Registers an additional stderr sink.
    pub fn add_stderr_writer(&self, w: OutputWriter) -> WriterKey {
        self.stderr.add(w, &self.tracker)
    }

    /// Detaches one stdout sink. Already-queued chunks still drain to it.
    pub fn remove_stdout_writer(&self, key: WriterKey) {
        self.stdout.remove(key);
    }

    /// Detaches one stderr sink.
    pub fn remove_stderr_writer(&self, key: WriterKey) {
        self.stderr.remove(key);
    }

    /// Returns a private readable endpoint carrying a copy of stdout,
    /// for a pull-based consumer such as the log copier.
    pub fn new_stdout_pipe(&self) -> DuplexStream {
        let (read_half, write_half) = duplex(PIPE_BUFFER);
        self.stdout.add(Box::new(write_half), &self.tracker);
        read_half
    }

    /// Returns a private readable endpoint carrying a copy of stderr.
    pub fn new_stderr_pipe(&self) -> DuplexStream {
        let (read_half, write_half) = duplex(PIPE_BUFFER);
        self.stderr.add(Box::new(write_half), &self.tracker);
        read_half
    }

    /// Binds to the process-side pipe endpoints and starts pumping bytes.
    ///
    /// Begins one background pump per output channel and, in interactive
    /// mode, a stdin copy task. Until this is called the stream is inert.
    pub fn copy_pipes(&self, pipes: Pipes) {
        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();
        self.stdout.rearm();
        self.stderr.rearm();
        self.closed.store(false, Ordering::SeqCst);
        // Writers never receive chunks before pumping starts, so any
        // recorded error belongs to a previous session.
        *self.sink_err.lock() = None;

        let stdin_src = match &mut *self.stdin.lock() {
            StdinSource::Interactive { pump, .. } => pump.take(),
            StdinSource::Discard => None,
        };
        match (stdin_src, pipes.stdin) {
            (Some(mut src), Some(mut dst)) => {
                // Deliberately untracked: an attach client that never
                // closes stdin must not keep `wait` from resolving. The
                // task ends on cancel, client EOF, or a broken process end.
                let cancel = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        res = tokio::io::copy(&mut src, &mut dst) => {
                            if let Err(e) = res {
                                debug!(error = %e, "stdin copy ended");
                            }
                        }
                    }
                    // Dropping `dst` closes the process's stdin.
                });
            }
            // Discard mode: drop the write side so the process reads EOF
            // right away.
            (None, Some(dst)) => drop(dst),
            _ => {}
        }

        // A channel the process supplies no endpoint for is at
        // end-of-stream from the start: release its sinks right away so
        // pull-based readers observe EOF and `wait` can drain.
        match pipes.stdout {
            Some(src) => self.spawn_pump(src, Arc::clone(&self.stdout), token.clone()),
            None => self.stdout.close_all(),
        }
        match pipes.stderr {
            Some(src) => self.spawn_pump(src, Arc::clone(&self.stderr), token),
            None => self.stderr.close_all(),
        }
    }

    fn spawn_pump(
        &self,
        mut src: Box<dyn AsyncRead + Send + Unpin>,
        registry: Arc<WriterRegistry>,
        cancel: CancellationToken,
    ) {
        self.tracker.spawn(async move {
            let mut buf = vec![0u8; COPY_BUFFER];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = src.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => registry.broadcast(&buf[..n]),
                        Err(e) => {
                            debug!(error = %e, "output pump read failed");
                            break;
                        }
                    }
                }
            }
            // End of the session's delivery: flush and release every sink
            // registered on this channel so pull-based readers observe EOF.
            registry.close_all();
        });
    }

    /// Blocks until all copy activity of the current session has drained:
    /// the pumps observed end-of-stream and every sink finished flushing.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Disengages stdin and terminates stdout/stderr pumping, unblocking
    /// any reader on a still-open pipe endpoint.
    ///
    /// Per-sink write failures are swallowed during delivery; the first
    /// one of the session is surfaced here, once, by the session's first
    /// `close`. Every later `close` returns `Ok(())`, even when an
    /// in-flight write fails after the first `close` already returned.
    pub fn close(&self) -> PodliteResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.lock().cancel();

        if let StdinSource::Interactive { client, pump } = &mut *self.stdin.lock() {
            client.take();
            pump.take();
        }

        self.stdout.close_all();
        self.stderr.close_all();

        match self.sink_err.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}
