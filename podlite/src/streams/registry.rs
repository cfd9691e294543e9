//! Writer registry: the capability object guarding a fan-out sink set.
//!
//! Registration mutates and delivery reads the same set from different
//! tasks, so the set lives behind one internal lock and is never handed
//! out as a raw collection. Each sink gets its own unbounded queue and a
//! drain task, which keeps a slow sink from stalling the other consumers
//! beyond its own buffering.
//!
//! The queues are unbounded: a sink that errors is evicted, but one that
//! merely stalls buffers up to the session's entire output in memory
//! until `close` detaches it. Sinks are daemon-controlled (attach
//! clients, log files, copier pipes), so that bound is accepted rather
//! than policed here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::errors::PodliteError;

/// A sink for container output, registered with a [`crate::streams::Stream`].
pub type OutputWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque handle identifying one registered sink.
///
/// Returned by registration so a superseded sink (e.g. a reopened CRI log
/// writer) can be detached individually without disturbing the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterKey(u64);

pub(crate) struct WriterRegistry {
    /// Which process channel this registry fans out ("stdout"/"stderr").
    channel: &'static str,
    inner: Mutex<Inner>,
    /// First sink write error of the session, surfaced once from
    /// `Stream::close`. Shared with the sibling registry.
    sink_err: Arc<Mutex<Option<PodliteError>>>,
}

struct Inner {
    next_key: u64,
    sinks: HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>,
    /// Set once the session's delivery has ended. A sink registered while
    /// drained can never receive bytes, so it is released immediately
    /// instead of parking a drain task that would stall `Stream::wait`.
    drained: bool,
}

impl WriterRegistry {
    pub(crate) fn new(
        channel: &'static str,
        sink_err: Arc<Mutex<Option<PodliteError>>>,
    ) -> Self {
        Self {
            channel,
            inner: Mutex::new(Inner {
                next_key: 0,
                sinks: HashMap::new(),
                drained: false,
            }),
            sink_err,
        }
    }

    /// Registers a sink and spawns its drain task on `tracker`.
    ///
    /// The sink observes every chunk broadcast from this point on, in
    /// emission order.
    pub(crate) fn add(&self, mut writer: OutputWriter, tracker: &TaskTracker) -> WriterKey {
        let channel = self.channel;

        {
            let mut inner = self.inner.lock();
            if inner.drained {
                debug!(channel, "sink registered on a drained stream, releasing it");
                let key = inner.next_key;
                inner.next_key += 1;
                drop(inner);
                tokio::spawn(async move {
                    let _ = writer.shutdown().await;
                });
                return WriterKey(key);
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let sink_err = Arc::clone(&self.sink_err);

        tracker.spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = writer.write_all(&chunk).await {
                    warn!(channel, error = %e, "evicting output sink after write failure");
                    sink_err
                        .lock()
                        .get_or_insert(PodliteError::SinkWrite { sink: channel, source: e });
                    // Dropping the receiver makes future broadcasts evict
                    // this sink from the set.
                    return;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut inner = self.inner.lock();
        let key = inner.next_key;
        inner.next_key += 1;
        inner.sinks.insert(key, tx);
        WriterKey(key)
    }

    /// Detaches one sink. Chunks already queued still drain to it before
    /// its writer is shut down.
    pub(crate) fn remove(&self, key: WriterKey) {
        if self.inner.lock().sinks.remove(&key.0).is_some() {
            debug!(channel = self.channel, ?key, "output sink detached");
        }
    }

    /// Delivers one chunk to every live sink, evicting sinks whose drain
    /// task has already failed.
    pub(crate) fn broadcast(&self, chunk: &[u8]) {
        self.inner
            .lock()
            .sinks
            .retain(|_, tx| tx.send(chunk.to_vec()).is_ok());
    }

    /// Detaches every sink; their drain tasks flush queued chunks and shut
    /// the writers down. The registry stays drained until [`Self::rearm`].
    pub(crate) fn close_all(&self) {
        let mut inner = self.inner.lock();
        inner.sinks.clear();
        inner.drained = true;
    }

    /// Rearms the registry for the next session's registrations.
    pub(crate) fn rearm(&self) {
        self.inner.lock().drained = false;
    }
}
