//! The push protocol between image producers and the materialization sink.
//!
//! A producer is handed a [`PixelSender`] and pushes a closed set of
//! [`ProductionMessage`]s through it: dimensions and encoding first, then
//! tiles in any order, then exactly one completion. The producer decides its
//! own threading. It may push everything before `start_production` returns,
//! or move the sender to another thread and return immediately. The only
//! thing the receiving side relies on is the completion message.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  PixelSender   ┌──────────────────┐  lock   ┌────────────┐
//! │ ImageProducer  │ ─────────────► │ ProductionFilter │ ──────► │ PixelSink  │
//! │ (any thread)   │                │ chain (optional) │         │            │
//! └────────────────┘                └──────────────────┘         └─────┬──────┘
//!                                                         wake-up on   │
//!                                                         completion   ▼
//!                                                                 waiting caller
//! ```
//!
//! Every message is applied on the sending thread before `send` returns, so a
//! sink that completes early (encoding-only fetches, inconsistent sources)
//! stops even a synchronous producer at its next send.
//!
//! Decorators such as [`SubsamplingSource`] wrap a producer and install a
//! [`ProductionFilter`] on the sender, so the wrapped producer speaks the same
//! protocol unchanged.

mod memory;
mod subsample;
mod threaded;

pub use memory::{MemorySource, TileOrder};
pub use subsample::SubsamplingSource;
pub use threaded::ThreadedSource;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::buffer::SampleData;
use crate::encoding::Encoding;

/// Auxiliary properties attached to a materialized image.
pub type Properties = HashMap<String, String>;

/// Identifies the sink of one fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// How a producer finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Every pixel has been delivered.
    Done,
    /// Production stopped early without an error.
    Aborted,
    /// Production failed.
    Failed(String),
}

/// One rectangular batch of samples.
///
/// Sample `(x + i, y + j)` of the tile is at `samples[offset + j * stride + i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub encoding: Encoding,
    pub samples: SampleData,
    pub offset: usize,
    pub stride: usize,
}

impl Tile {
    /// A tightly packed tile (`offset = 0`, `stride = width`).
    pub fn new(x: i32, y: i32, width: i32, height: i32, encoding: Encoding, samples: SampleData) -> Self {
        Self {
            x,
            y,
            width,
            height,
            encoding,
            samples,
            offset: 0,
            stride: width.max(0) as usize,
        }
    }

    /// Override where the tile starts in `samples` and how far apart rows are.
    pub fn with_layout(mut self, offset: usize, stride: usize) -> Self {
        self.offset = offset;
        self.stride = stride;
        self
    }
}

/// Everything a producer can push.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductionMessage {
    /// Full extent of the source.
    Dimensions { width: i32, height: i32 },
    /// Encoding of the samples that follow.
    Encoding(Encoding),
    /// A batch of pixels.
    Tile(Tile),
    /// Auxiliary properties; the last one wins.
    Properties(Properties),
    /// Terminal signal.
    Complete(CompletionStatus),
}

/// The receiving side no longer accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("production consumer is closed")]
pub struct ProductionClosed;

/// Transforms messages on their way to the sink.
///
/// A filter may forward zero, one or several messages to `downstream` for each
/// message it receives.
pub trait ProductionFilter: Send + Sync {
    fn filter(&self, message: ProductionMessage, downstream: &PixelSender) -> Result<(), ProductionClosed>;
}

/// A push-based image producer.
pub trait ImageProducer: Send + Sync {
    /// Begin pushing messages through `sender`.
    ///
    /// May block until production is complete or return immediately and
    /// deliver from another thread.
    fn start_production(&self, sender: PixelSender);

    /// The consumer is done; stop delivering to it.
    fn remove_consumer(&self, _consumer: ConsumerId) {}
}

/// The receiving end of a production channel.
///
/// Messages are applied on the thread that sends them, under the link's lock.
pub(crate) trait MessageSink: Send {
    fn accept(&mut self, message: ProductionMessage);

    fn is_finished(&self) -> bool;
}

struct SinkLink {
    sink: Arc<Mutex<dyn MessageSink>>,
    closed: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl SinkLink {
    fn deliver(&self, message: ProductionMessage) -> Result<(), ProductionClosed> {
        let mut sink = self.sink.lock();
        if sink.is_finished() || self.closed.load(Ordering::Acquire) {
            return Err(ProductionClosed);
        }
        sink.accept(message);
        if sink.is_finished() {
            // The waiting side may already be gone
            let _ = self.wake.send(());
        }
        Ok(())
    }
}

/// Producer-side handle for pushing messages to one sink.
///
/// Clones share the same sink. The sink learns that its producer is gone when
/// every clone has been dropped.
#[derive(Clone)]
pub struct PixelSender {
    consumer: ConsumerId,
    link: Arc<SinkLink>,
    filter: Option<(Arc<dyn ProductionFilter>, Box<PixelSender>)>,
}

impl PixelSender {
    /// The sink this sender delivers to.
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Returns true once the sink has completed; further messages are refused.
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// Route every message through `filter` before it reaches this sender.
    pub fn with_filter(self, filter: Arc<dyn ProductionFilter>) -> PixelSender {
        PixelSender {
            consumer: self.consumer,
            link: Arc::clone(&self.link),
            filter: Some((filter, Box::new(self))),
        }
    }

    /// Push a message.
    ///
    /// The sink applies it before this call returns. An error means the sink
    /// has completed and the producer should stop.
    pub fn send(&self, message: ProductionMessage) -> Result<(), ProductionClosed> {
        if self.is_closed() {
            return Err(ProductionClosed);
        }
        match &self.filter {
            Some((filter, downstream)) => filter.filter(message, downstream),
            None => self.link.deliver(message),
        }
    }

    /// Announce the full source extent.
    pub fn dimensions(&self, width: i32, height: i32) -> Result<(), ProductionClosed> {
        self.send(ProductionMessage::Dimensions { width, height })
    }

    /// Announce the sample encoding.
    pub fn encoding(&self, encoding: Encoding) -> Result<(), ProductionClosed> {
        self.send(ProductionMessage::Encoding(encoding))
    }

    /// Deliver a tile.
    pub fn tile(&self, tile: Tile) -> Result<(), ProductionClosed> {
        self.send(ProductionMessage::Tile(tile))
    }

    /// Attach auxiliary properties.
    pub fn properties(&self, properties: Properties) -> Result<(), ProductionClosed> {
        self.send(ProductionMessage::Properties(properties))
    }

    /// Signal the end of production.
    pub fn complete(&self, status: CompletionStatus) -> Result<(), ProductionClosed> {
        self.send(ProductionMessage::Complete(status))
    }
}

impl std::fmt::Debug for PixelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelSender")
            .field("consumer", &self.consumer)
            .field("closed", &self.is_closed())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Stops a running cycle without keeping the producer side alive.
///
/// Never touches the sink lock, so it is safe to call from a progress
/// listener running inside a delivery.
#[derive(Debug, Clone)]
pub(crate) struct AbortHandle {
    requested: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl AbortHandle {
    pub(crate) fn abort(&self) {
        self.requested.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        // The cycle may already have finished and dropped its receiver
        let _ = self.wake.send(());
    }
}

/// Waiting side of a production channel.
pub(crate) struct ProductionReceiver {
    wake_rx: Receiver<()>,
    wake_tx: Sender<()>,
    link: Weak<SinkLink>,
    closed: Arc<AtomicBool>,
    abort_requested: Arc<AtomicBool>,
}

impl ProductionReceiver {
    /// Block until the sink finishes, an abort arrives or `timeout` elapses.
    ///
    /// Returns false on timeout.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }

    /// Returns true once every [`PixelSender`] for this cycle is gone.
    pub(crate) fn producer_dropped(&self) -> bool {
        self.link.strong_count() == 0
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            requested: Arc::clone(&self.abort_requested),
            closed: Arc::clone(&self.closed),
            wake: self.wake_tx.clone(),
        }
    }
}

/// Create the channel for one fetch cycle.
///
/// `closed` is the flag the sink raises when it completes; senders refuse
/// messages once it is set.
pub(crate) fn production_channel(
    consumer: ConsumerId,
    sink: Arc<Mutex<dyn MessageSink>>,
    closed: Arc<AtomicBool>,
) -> (PixelSender, ProductionReceiver) {
    let (wake_tx, wake_rx) = mpsc::channel();
    let link = Arc::new(SinkLink {
        sink,
        closed: Arc::clone(&closed),
        wake: wake_tx.clone(),
    });

    let receiver = ProductionReceiver {
        wake_rx,
        wake_tx,
        link: Arc::downgrade(&link),
        closed,
        abort_requested: Arc::new(AtomicBool::new(false)),
    };
    let sender = PixelSender {
        consumer,
        link,
        filter: None,
    };
    (sender, receiver)
}

/// A sink that records messages, for exercising producers in isolation.
#[cfg(test)]
pub(crate) mod recording {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: VecDeque<ProductionMessage>,
        finished: bool,
    }

    impl MessageSink for Recorder {
        fn accept(&mut self, message: ProductionMessage) {
            if matches!(message, ProductionMessage::Complete(_)) {
                self.finished = true;
            }
            self.messages.push_back(message);
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    pub(crate) struct Recording {
        recorder: Arc<Mutex<Recorder>>,
        closed: Arc<AtomicBool>,
        receiver: ProductionReceiver,
    }

    impl Recording {
        pub(crate) fn try_recv(&self) -> Option<ProductionMessage> {
            self.recorder.lock().messages.pop_front()
        }

        pub(crate) fn drain(&self) -> Vec<ProductionMessage> {
            self.recorder.lock().messages.drain(..).collect()
        }

        /// Refuse further messages, as a completed sink does.
        pub(crate) fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }

        pub(crate) fn wait_finished(&self, timeout: Duration) -> bool {
            self.recorder.lock().finished || self.receiver.wait(timeout)
        }

        pub(crate) fn receiver(&self) -> &ProductionReceiver {
            &self.receiver
        }
    }

    pub(crate) fn recording_channel() -> (PixelSender, Recording) {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let sink: Arc<Mutex<dyn MessageSink>> = recorder.clone();
        let (sender, receiver) = production_channel(ConsumerId::next(), sink, Arc::clone(&closed));
        (
            sender,
            Recording {
                recorder,
                closed,
                receiver,
            },
        )
    }
}
