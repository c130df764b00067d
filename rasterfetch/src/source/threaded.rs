//! Asynchronous delivery on a Tokio runtime.
//!
//! [`ThreadedSource`] turns any producer into one that returns from
//! `start_production` immediately and delivers from the runtime's blocking
//! pool. The receiving side cannot tell the difference, which is the point.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::trace;

use super::{ConsumerId, ImageProducer, PixelSender};

/// Runs a wrapped producer on a Tokio runtime.
pub struct ThreadedSource {
    inner: Arc<dyn ImageProducer>,
    runtime: Handle,
}

impl ThreadedSource {
    /// Deliver `inner` on `runtime`.
    pub fn new(inner: Arc<dyn ImageProducer>, runtime: Handle) -> Self {
        Self { inner, runtime }
    }

    /// Deliver `inner` on the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn current(inner: Arc<dyn ImageProducer>) -> Self {
        Self::new(inner, Handle::current())
    }
}

impl ImageProducer for ThreadedSource {
    fn start_production(&self, sender: PixelSender) {
        let inner = Arc::clone(&self.inner);
        trace!(consumer = %sender.consumer(), "Spawning production on runtime");
        // Detached: completion is reported through the sender, not the join handle
        drop(self.runtime.spawn_blocking(move || inner.start_production(sender)));
    }

    fn remove_consumer(&self, consumer: ConsumerId) {
        self.inner.remove_consumer(consumer);
    }
}
