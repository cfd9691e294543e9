//! Error types for the container I/O pipeline.
//!
//! Errors are categorized by where they surface:
//! - [`PodliteError::Configuration`]: setup failures (user/orchestrator-fixable)
//! - [`PodliteError::SinkWrite`]: a registered output sink failed mid-delivery
//! - [`PodliteError::DriverClose`]: the log driver failed to close cleanly
//!
//! A log copier that does not drain within the teardown grace period is an
//! operational warning, not an error, and therefore has no variant here.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the per-container I/O pipeline.
#[derive(Debug, Error)]
pub enum PodliteError {
    /// A log destination could not be set up (e.g. CRI log path unopenable).
    #[error("configuration: cannot open {path}: {source}")]
    Configuration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A registered output sink failed while bytes were being delivered.
    ///
    /// The failing sink is evicted; delivery to the remaining sinks
    /// continues. Surfaced once, from `Stream::close`.
    #[error("sink write ({sink}): {source}")]
    SinkWrite {
        sink: &'static str,
        #[source]
        source: io::Error,
    },

    /// The installed log driver failed to close.
    #[error("log driver close: {0}")]
    DriverClose(String),

    /// Internal invariant violation (channel closed unexpectedly, etc.).
    #[error("internal: {0}")]
    Internal(String),

    /// Generic IO error (catch-all).
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate.
pub type PodliteResult<T> = Result<T, PodliteError>;
