//! Seam between the runtime client's process handle and the controller.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::debug;

use crate::errors::PodliteResult;
use crate::streams::Pipes;

/// Raw process I/O supplied by the runtime client.
///
/// Exposes the process-side pipe endpoints plus the substrate's own
/// wait/close, which the [`crate::containerio::WrappedIo`] adapter
/// sequences strictly before the controller's logging teardown.
#[async_trait]
pub trait RawProcessIo: Send {
    /// Hands over the pipe endpoints. Called once, at init.
    fn detach_pipes(&mut self) -> Pipes;

    /// Blocks until the process side has closed its ends.
    async fn wait(&mut self);

    /// Releases the substrate's own resources.
    async fn close(&mut self) -> PodliteResult<()>;
}

/// Raw process I/O over a locally spawned [`tokio::process::Child`].
///
/// The child must have been spawned with piped stdio for the endpoints
/// to be present.
pub struct ChildProcessIo {
    child: Child,
}

impl ChildProcessIo {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl RawProcessIo for ChildProcessIo {
    fn detach_pipes(&mut self) -> Pipes {
        Pipes {
            stdin: self
                .child
                .stdin
                .take()
                .map(|w| Box::new(w) as Box<dyn AsyncWrite + Send + Unpin>),
            stdout: self
                .child
                .stdout
                .take()
                .map(|r| Box::new(r) as Box<dyn AsyncRead + Send + Unpin>),
            stderr: self
                .child
                .stderr
                .take()
                .map(|r| Box::new(r) as Box<dyn AsyncRead + Send + Unpin>),
        }
    }

    async fn wait(&mut self) {
        if let Err(e) = self.child.wait().await {
            debug!(error = %e, "child process wait failed");
        }
    }

    async fn close(&mut self) -> PodliteResult<()> {
        // Reap the child if it is still running; the pipe endpoints were
        // handed off at init and close with the pumps.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
        Ok(())
    }
}
