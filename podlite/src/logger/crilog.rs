//! Orchestrator-compatible per-container log files.
//!
//! Bridges stream output into an append-only file the cluster
//! orchestrator tails. The on-disk line format is the collaborator's
//! concern; this module only needs append-only writers.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tracing::debug;

use crate::errors::{PodliteError, PodliteResult};
use crate::streams::{Stream, WriterKey};

/// One attachment of an orchestrator log file to a container's stream.
///
/// Produces a stdout writer always and a stderr writer only when the
/// container runs without a combined terminal (terminal mode multiplexes
/// both channels into one stream, writing it twice would duplicate it).
///
/// Reopen is a new `attach` followed by closing the superseded instance:
/// the new writers begin capturing before the old ones are detached, so
/// a brief duplicate window is possible but bytes are never dropped.
pub struct CriLog {
    path: PathBuf,
    stdout_key: WriterKey,
    stderr_key: Option<WriterKey>,
}

impl CriLog {
    /// Opens (append, create) the log file at `path` and registers its
    /// writer(s) with `stream`.
    pub async fn attach(
        stream: &Stream,
        path: impl Into<PathBuf>,
        with_terminal: bool,
    ) -> PodliteResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| PodliteError::Configuration {
                path: path.clone(),
                source,
            })?;

        let stderr_key = if with_terminal {
            None
        } else {
            // Same file, second handle: stdout and stderr interleave as
            // appends through the shared file description.
            let twin = file
                .try_clone()
                .await
                .map_err(|source| PodliteError::Configuration {
                    path: path.clone(),
                    source,
                })?;
            Some(stream.add_stderr_writer(Box::new(twin)))
        };
        let stdout_key = stream.add_stdout_writer(Box::new(file));

        debug!(path = %path.display(), with_terminal, "cri log attached");
        Ok(Self {
            path,
            stdout_key,
            stderr_key,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detaches the writer(s) from `stream`.
    ///
    /// Bytes already queued for this attachment still drain to the file;
    /// the handles are flushed and released once that finishes.
    pub fn close(self, stream: &Stream) {
        stream.remove_stdout_writer(self.stdout_key);
        if let Some(key) = self.stderr_key {
            stream.remove_stderr_writer(key);
        }
        debug!(path = %self.path.display(), "cri log detached");
    }
}
