//! Log driver forwarding container output into the daemon's own logs.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{LogDriver, LogMessage, SOURCE_STDERR};
use crate::errors::PodliteResult;

/// Re-logs container console lines through `tracing`, stdout at DEBUG and
/// stderr at WARN, tagged with the container id for filtering.
///
/// Useful for development and for containers whose output should land in
/// the daemon's journal instead of a per-container file.
pub struct TracingLogDriver {
    id: String,
}

impl TracingLogDriver {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl LogDriver for TracingLogDriver {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write_message(&mut self, msg: LogMessage) -> PodliteResult<()> {
        let line = String::from_utf8_lossy(&msg.line);
        let line = line.trim_end_matches(['\r', '\n']);
        if msg.source == SOURCE_STDERR {
            warn!(target: "container:stderr", container = %self.id, "{line}");
        } else {
            debug!(target: "container:stdout", container = %self.id, "{line}");
        }
        Ok(())
    }

    async fn close(&mut self) -> PodliteResult<()> {
        Ok(())
    }
}
