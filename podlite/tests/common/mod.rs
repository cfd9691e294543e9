#![allow(dead_code)]

//! Shared fixtures: capturing/failing sinks, instrumented log drivers,
//! and a fake raw process I/O driven by in-process pipes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, duplex};

use podlite::errors::{PodliteError, PodliteResult};
use podlite::logger::{LogDriver, LogMessage};
use podlite::streams::Pipes;
use podlite::RawProcessIo;

/// Ordered record of teardown calls, shared between instrumented fakes.
pub type Recorder = Arc<Mutex<Vec<&'static str>>>;

pub fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// SINK FIXTURES
// ============================================================================

/// In-memory sink; the shared buffer can be inspected while delivery runs.
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Self { buf: Arc::clone(&buf) }, buf)
    }
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink whose every write fails with `BrokenPipe`.
pub struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink whose write stalls until the gate fires, then fails with
/// `BrokenPipe`; `entered` flips once a write is in flight.
pub struct StalledFailingWriter {
    gate: tokio::sync::oneshot::Receiver<()>,
    entered: Arc<AtomicBool>,
}

impl StalledFailingWriter {
    pub fn new() -> (Self, tokio::sync::oneshot::Sender<()>, Arc<AtomicBool>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let entered = Arc::new(AtomicBool::new(false));
        (
            Self {
                gate: rx,
                entered: Arc::clone(&entered),
            },
            tx,
            entered,
        )
    }
}

impl AsyncWrite for StalledFailingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.entered.store(true, Ordering::SeqCst);
        match Pin::new(&mut self.gate).poll(cx) {
            Poll::Ready(_) => {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone")))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// LOG DRIVER FIXTURES
// ============================================================================

/// Messages recorded by a [`CapturingDriver`], `(source, line bytes)`.
pub type DriverRecord = Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>;

/// Records every message; optionally reports `close` to a [`Recorder`].
pub struct CapturingDriver {
    records: DriverRecord,
    events: Option<Recorder>,
}

impl CapturingDriver {
    pub fn new() -> (Self, DriverRecord) {
        let records: DriverRecord = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                records: Arc::clone(&records),
                events: None,
            },
            records,
        )
    }

    pub fn with_events(events: Recorder) -> (Self, DriverRecord) {
        let (mut driver, records) = Self::new();
        driver.events = Some(events);
        (driver, records)
    }
}

#[async_trait]
impl LogDriver for CapturingDriver {
    fn name(&self) -> &'static str {
        "capturing"
    }

    async fn write_message(&mut self, msg: LogMessage) -> PodliteResult<()> {
        self.records.lock().push((msg.source, msg.line));
        Ok(())
    }

    async fn close(&mut self) -> PodliteResult<()> {
        if let Some(events) = &self.events {
            events.lock().push("driver.close");
        }
        Ok(())
    }
}

/// Driver whose write and close never return; `entered` flips once a
/// write has been attempted, so tests can wedge it deterministically.
pub struct HangingDriver {
    pub entered: Arc<AtomicBool>,
}

impl HangingDriver {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let entered = Arc::new(AtomicBool::new(false));
        (
            Self {
                entered: Arc::clone(&entered),
            },
            entered,
        )
    }
}

#[async_trait]
impl LogDriver for HangingDriver {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn write_message(&mut self, _msg: LogMessage) -> PodliteResult<()> {
        self.entered.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&mut self) -> PodliteResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Driver that fails to close, for the non-short-circuit teardown test.
pub struct FailingCloseDriver;

#[async_trait]
impl LogDriver for FailingCloseDriver {
    fn name(&self) -> &'static str {
        "failing-close"
    }

    async fn write_message(&mut self, _msg: LogMessage) -> PodliteResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> PodliteResult<()> {
        Err(PodliteError::DriverClose("flush failed".into()))
    }
}

// ============================================================================
// RAW PROCESS I/O FIXTURES
// ============================================================================

/// Fake raw process I/O: pipes are supplied by the test, wait/close are
/// recorded for call-order assertions.
pub struct FakeRawIo {
    pipes: Option<Pipes>,
    events: Recorder,
    /// When set, `wait` blocks until the gate fires.
    wait_gate: Option<tokio::sync::oneshot::Receiver<()>>,
}

impl FakeRawIo {
    pub fn new(pipes: Pipes, events: Recorder) -> Self {
        Self {
            pipes: Some(pipes),
            events,
            wait_gate: None,
        }
    }

    pub fn gated(pipes: Pipes, events: Recorder) -> (Self, tokio::sync::oneshot::Sender<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut raw = Self::new(pipes, events);
        raw.wait_gate = Some(rx);
        (raw, tx)
    }
}

#[async_trait]
impl RawProcessIo for FakeRawIo {
    fn detach_pipes(&mut self) -> Pipes {
        self.pipes.take().expect("pipes detached once")
    }

    async fn wait(&mut self) {
        if let Some(gate) = self.wait_gate.take() {
            let _ = gate.await;
        }
        self.events.lock().push("raw.wait");
    }

    async fn close(&mut self) -> PodliteResult<()> {
        self.events.lock().push("raw.close");
        Ok(())
    }
}

/// Raw pipes carrying only a stdout source.
pub fn stdout_pipes(stdout: impl AsyncRead + Send + Unpin + 'static) -> Pipes {
    Pipes {
        stdin: None,
        stdout: Some(Box::new(stdout)),
        stderr: None,
    }
}

/// Raw pipes carrying stdout and stderr sources.
pub fn output_pipes(
    stdout: impl AsyncRead + Send + Unpin + 'static,
    stderr: impl AsyncRead + Send + Unpin + 'static,
) -> Pipes {
    Pipes {
        stdin: None,
        stdout: Some(Box::new(stdout)),
        stderr: Some(Box::new(stderr)),
    }
}

/// An in-process stdout feed: the test writes into the returned half, the
/// other half plays the process's stdout pipe.
pub fn stdout_feed() -> (DuplexStream, DuplexStream) {
    duplex(16 * 1024)
}

/// Polls `cond` until it holds, panicking after a few seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time: {what}");
}
