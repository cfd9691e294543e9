//! Per-container I/O controller.
//!
//! [`ContainerIo`] is the single authoritative handle coordinating the
//! stream multiplexer, the installed log driver, and the CRI log across a
//! container's full attach/start/stop/restart history. It is created once
//! per container id and rearmed with [`ContainerIo::reset`] for each new
//! process incarnation.

mod raw;

pub use raw::{ChildProcessIo, RawProcessIo};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::errors::PodliteResult;
use crate::logger::{
    CriLog, LogCopier, LogDriver, LogSource, SOURCE_STDERR, SOURCE_STDOUT, SharedDriver,
};
use crate::streams::Stream;

/// Grace period granted to the log copier (and the driver's close) during
/// teardown. A stuck downstream sink must never prevent a container's
/// teardown from completing; expiry degrades to a warning.
const LOG_COPIER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Session-scoped attachments, cleared by `close`/`reset`.
#[derive(Default)]
struct SessionState {
    logdriver: Option<SharedDriver>,
    logcopier: Option<LogCopier>,
    cri_log: Option<CriLog>,
}

struct Inner {
    id: String,
    use_stdin: bool,
    stream: Stream,
    /// Mutated only from the lifecycle task; teardown takes the fields
    /// out under the lock and awaits outside it.
    state: Mutex<SessionState>,
}

/// Container I/O handle, one per container id.
///
/// Cheap to clone; all clones refer to the same underlying pipeline.
/// `set_log_driver`/`attach_cri_log`/`init_container_io`/`close`/`reset`
/// must be driven from the single container-lifecycle task.
#[derive(Clone)]
pub struct ContainerIo {
    inner: Arc<Inner>,
}

impl ContainerIo {
    /// Creates the handle and installs the stdin mode: interactive when
    /// `with_stdin`, otherwise immediate end-of-input.
    pub fn new(id: impl Into<String>, with_stdin: bool) -> Self {
        let stream = Stream::new();
        if with_stdin {
            stream.new_stdin_input();
        } else {
            stream.new_discard_stdin_input();
        }

        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                use_stdin: with_stdin,
                stream,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The stream handle, for attach/exec endpoints that register
    /// additional interactive writers dynamically.
    pub fn stream(&self) -> &Stream {
        &self.inner.stream
    }

    /// Installs the sink used once logging starts; takes effect at the
    /// next [`ContainerIo::init_container_io`].
    pub fn set_log_driver(&self, driver: Box<dyn LogDriver>) {
        self.inner.state.lock().logdriver = Some(Arc::new(tokio::sync::Mutex::new(driver)));
    }

    /// Opens (or reopens) the orchestrator log file and registers its
    /// writer(s) with the stream.
    ///
    /// The new writers begin capturing before any previously attached CRI
    /// log is evicted, so reopen never drops in-flight bytes; after this
    /// returns, the old file receives no further writes.
    pub async fn attach_cri_log(
        &self,
        path: impl Into<std::path::PathBuf>,
        with_terminal: bool,
    ) -> PodliteResult<()> {
        let log = CriLog::attach(&self.inner.stream, path, with_terminal).await?;
        let prev = self.inner.state.lock().cri_log.replace(log);
        if let Some(prev) = prev {
            prev.close(&self.inner.stream);
        }
        Ok(())
    }

    /// Wires the stream to the raw process pipes, starting the log copier
    /// first when a driver is installed. Returns the client-facing handle
    /// the lifecycle orchestrator waits on and closes.
    pub fn init_container_io(
        &self,
        mut raw: Box<dyn RawProcessIo>,
    ) -> PodliteResult<WrappedIo> {
        self.start_logging()?;
        self.inner.stream.copy_pipes(raw.detach_pipes());
        Ok(WrappedIo {
            raw,
            cntrio: self.clone(),
        })
    }

    fn start_logging(&self) -> PodliteResult<()> {
        let mut state = self.inner.state.lock();
        let Some(driver) = state.logdriver.clone() else {
            return Ok(());
        };

        let stdout_pipe: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(self.inner.stream.new_stdout_pipe());
        let stderr_pipe: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(self.inner.stream.new_stderr_pipe());
        let sources: Vec<LogSource> = vec![
            (SOURCE_STDOUT, stdout_pipe),
            (SOURCE_STDERR, stderr_pipe),
        ];
        let mut copier = LogCopier::new(driver, sources);
        copier.start_copy();
        state.logcopier = Some(copier);
        Ok(())
    }

    /// Blocks until the stream has drained.
    ///
    /// Covers fan-out delivery only; the copier may still be handing
    /// lines to the log driver when this returns. Delivery to the driver
    /// is complete only after [`close`](Self::close).
    pub async fn wait(&self) {
        self.inner.stream.wait().await;
    }

    /// Stops the stream and tears the logging pipeline down.
    ///
    /// Every step runs regardless of earlier failures; the first hard
    /// error is returned. The copier and the driver's close share one
    /// bounded grace period, so a hung sink degrades to a warning instead
    /// of stalling teardown. Idempotent: a second call is a no-op
    /// returning `Ok(())`.
    pub async fn close(&self) -> PodliteResult<()> {
        let mut last_err = self.inner.stream.close().err();

        let (driver, copier, cri_log) = {
            let mut state = self.inner.state.lock();
            (
                state.logdriver.take(),
                state.logcopier.take(),
                state.cri_log.take(),
            )
        };

        if let Some(driver) = driver {
            let deadline = tokio::time::Instant::now() + LOG_COPIER_CLOSE_TIMEOUT;

            if let Some(copier) = copier
                && tokio::time::timeout_at(deadline, copier.wait()).await.is_err()
            {
                warn!(
                    container = %self.inner.id,
                    "log copier did not drain within the grace period"
                );
            }

            let close_driver = async { driver.lock().await.close().await };
            match tokio::time::timeout_at(deadline, close_driver).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(container = %self.inner.id, error = %e, "log driver close failed");
                    last_err.get_or_insert(e);
                }
                // The driver is wedged (or its lock is held by a wedged
                // write); abandon it rather than stall teardown.
                Err(_) => warn!(
                    container = %self.inner.id,
                    "log driver did not close within the grace period"
                ),
            }
        }

        if let Some(cri_log) = cri_log {
            cri_log.close(&self.inner.stream);
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rearms the handle for the next process incarnation under the same
    /// id: closes the current session (error logged, not propagated) and
    /// reinstalls the original stdin mode. Driver, copier, and CRI log
    /// references are cleared; nothing stale survives into the new
    /// session.
    pub async fn reset(&self) {
        if let Err(e) = self.close().await {
            warn!(container = %self.inner.id, error = %e, "failed to close during reset");
        }

        if self.inner.use_stdin {
            self.inner.stream.new_stdin_input();
        } else {
            self.inner.stream.new_discard_stdin_input();
        }
    }
}

/// Ordering decorator pairing the substrate's raw process I/O with its
/// controller behind one handle.
///
/// `wait` and `close` always finish the raw delegate before touching the
/// controller, so the orchestrator cannot reap the process before its
/// buffered output reached the logging pipeline. No timeout of its own;
/// the only bound is the controller's grace period.
pub struct WrappedIo {
    raw: Box<dyn RawProcessIo>,
    cntrio: ContainerIo,
}

impl WrappedIo {
    /// Waits on the raw process I/O, then on the controller.
    pub async fn wait(&mut self) {
        self.raw.wait().await;
        self.cntrio.wait().await;
    }

    /// Closes the raw process I/O (error logged, not propagated), then
    /// the controller, returning the controller's result.
    pub async fn close(&mut self) -> PodliteResult<()> {
        if let Err(e) = self.raw.close().await {
            warn!(container = %self.cntrio.id(), error = %e, "raw process I/O close failed");
        }
        self.cntrio.close().await
    }
}
