//! Background pump from stream pipe endpoints into the installed driver.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::{LogMessage, SharedDriver};

/// A named reader feeding the copier, e.g. `("stdout", pipe)`.
pub type LogSource = (&'static str, Box<dyn AsyncRead + Send + Unpin>);

/// Continuously transfers bytes from named readers into a log driver.
///
/// Ephemeral: bound to one driver and a fixed source set, created at init
/// and torn down with the session. Decoupled from the stream's own fan-out
/// so a slow driver cannot back-pressure interactive consumers beyond
/// existing pipe buffering.
pub struct LogCopier {
    driver: SharedDriver,
    sources: Vec<LogSource>,
    tracker: TaskTracker,
}

impl LogCopier {
    pub fn new(driver: SharedDriver, sources: Vec<LogSource>) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();
        Self {
            driver,
            sources,
            tracker,
        }
    }

    /// Starts one pump task per source. Non-blocking.
    ///
    /// Each pump reads lines until end-of-stream and hands them to the
    /// driver tagged with the source name. A driver write failure stops
    /// that source's pump (logged, never propagated).
    pub fn start_copy(&mut self) {
        for (source, reader) in self.sources.drain(..) {
            let driver = Arc::clone(&self.driver);
            self.tracker.spawn(async move {
                let mut reader = BufReader::new(reader);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let msg = LogMessage {
                                source,
                                line: line.clone(),
                                timestamp: Utc::now(),
                            };
                            if let Err(e) = driver.lock().await.write_message(msg).await {
                                warn!(source, error = %e, "log driver rejected message, stopping copy");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(source, error = %e, "log source read failed");
                            return;
                        }
                    }
                }
                debug!(source, "log copy drained");
            });
        }
    }

    /// Blocks until every source reached end-of-stream and all bytes were
    /// handed to the driver.
    ///
    /// The controller bounds this with its grace period; not finishing in
    /// time is an operational warning there, never a teardown failure.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}
