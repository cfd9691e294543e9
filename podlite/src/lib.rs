//! # podlite
//!
//! Daemon-side per-container I/O and logging pipeline.
//!
//! One [`ContainerIo`] per container id owns the running process's
//! standard streams, multiplexes them to any number of independent
//! consumers (interactive attach clients, a persistent [`LogDriver`],
//! an orchestrator-compatible [`CriLog`] file), and guarantees a
//! bounded-time teardown when the process exits or the container is
//! stopped or restarted.
//!
//! ```text
//!                         ┌──────────────────────────────┐
//!   raw process pipes ──▶ │          Stream              │ ──▶ attach writers
//!   (RawProcessIo)        │  stdin source + fan-out      │ ──▶ CriLog file
//!                         └──────────────┬───────────────┘
//!                                        │ pull pipes
//!                                        ▼
//!                                   LogCopier ──▶ LogDriver
//! ```
//!
//! Lifecycle: create a [`ContainerIo`], install a driver and/or CRI log,
//! call [`ContainerIo::init_container_io`] with the raw process I/O and
//! hold the returned [`WrappedIo`]; its `wait`/`close` sequence raw
//! process teardown strictly before logging teardown. [`ContainerIo::reset`]
//! rearms the same handle for the container's next process incarnation.

pub mod containerio;
pub mod errors;
pub mod logger;
pub mod streams;

pub use containerio::{ChildProcessIo, ContainerIo, RawProcessIo, WrappedIo};
pub use errors::{PodliteError, PodliteResult};
pub use logger::{CriLog, LogCopier, LogDriver, LogMessage, TracingLogDriver};
pub use streams::{Pipes, Stream, WriterKey};
