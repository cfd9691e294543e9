//! Pluggable persistence of container console output.
//!
//! A [`LogDriver`] is the capability a log sink exposes to the pipeline:
//! accept tagged messages, close when the container's session ends. How
//! (and whether) messages are persisted, formatted, or rotated is the
//! driver's business.

mod copier;
mod crilog;
mod tracing_driver;

pub use copier::{LogCopier, LogSource};
pub use crilog::CriLog;
pub use tracing_driver::TracingLogDriver;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PodliteResult;

/// Source tag for messages read from the container's stdout.
pub const SOURCE_STDOUT: &str = "stdout";

/// Source tag for messages read from the container's stderr.
pub const SOURCE_STDERR: &str = "stderr";

/// One unit of container console output handed to a log driver.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Which stream the bytes came from ([`SOURCE_STDOUT`]/[`SOURCE_STDERR`]).
    pub source: &'static str,
    /// Raw line bytes, including the trailing newline when one was read.
    pub line: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Sink that persists a container's console output.
#[async_trait]
pub trait LogDriver: Send {
    fn name(&self) -> &'static str;

    async fn write_message(&mut self, msg: LogMessage) -> PodliteResult<()>;

    /// Flushes and releases the sink. Called once per session, after the
    /// copier was given its grace period.
    async fn close(&mut self) -> PodliteResult<()>;
}

/// A log driver shared between the copier's pump tasks and the
/// controller's teardown path.
pub type SharedDriver = Arc<tokio::sync::Mutex<Box<dyn LogDriver>>>;
