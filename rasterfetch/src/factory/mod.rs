//! The materialization controller.
//!
//! An [`ImageFactory`] owns a reference to a push-based [`ImageProducer`] and
//! turns its asynchronous tile stream into one fully assembled
//! [`MaterializedImage`]. The caller blocks until the producer signals
//! completion; the result is cached until the region or subsampling changes
//! or the factory is disposed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rasterfetch::{Encoding, ImageFactory, MemorySource, Region, SampleData};
//!
//! let source = MemorySource::new(4, 4, Encoding::gray8(), SampleData::Bytes((0..16).collect()))?;
//! let factory = ImageFactory::new(Arc::new(source));
//! factory.set_region(Region::new(1, 1, 2, 2));
//!
//! let image = factory.get_image()?.expect("fetch was not aborted");
//! assert_eq!((image.width(), image.height()), (2, 2));
//! assert_eq!(image.sample(0, 0), Some(5));
//! # Ok::<(), rasterfetch::FactoryError>(())
//! ```
//!
//! # Concurrency
//!
//! One fetch runs per factory at a time; the cache lock is held for the whole
//! cycle. Region and subsampling live behind their own lock, which a fetch
//! only reads when it starts. Reconfiguring never waits for a running fetch:
//! the change bumps a generation counter, and a fetch that started under an
//! older generation hands its result to its caller without caching it.
//! [`ImageFactory::abort`] takes neither lock and can unblock a fetch from any
//! thread, including a progress listener.

mod config;
mod image;

pub use config::{FactoryConfig, DEFAULT_WAIT_INTERVAL};
pub use image::MaterializedImage;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::encoding::Encoding;
use crate::error::{ConversionError, FactoryError, FactoryResult};
use crate::geometry::{resolve_region, FetchMode, Region, Subsampling};
use crate::progress::{ListenerId, ProgressListener, ProgressNotifier};
use crate::sink::PixelSink;
use crate::source::{
    production_channel, AbortHandle, CompletionStatus, ConsumerId, ImageProducer, MessageSink,
    ProductionReceiver, SubsamplingSource,
};

/// Process-unique identifier of an [`ImageFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryId(u64);

impl FactoryId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FactoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "factory-{}", self.0)
    }
}

/// What the next fetch will materialize.
#[derive(Debug, Clone, Copy, Default)]
struct Settings {
    region: Region,
    subsampling: Subsampling,
    generation: u64,
}

/// Results of earlier fetches, valid for one settings generation.
#[derive(Debug, Default)]
struct Cache {
    generation: u64,
    image: Option<Arc<MaterializedImage>>,
    encoding: Option<Encoding>,
}

impl Cache {
    fn clear(&mut self) {
        self.image = None;
        self.encoding = None;
    }

    /// Drop results that belong to an older generation.
    fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            self.clear();
            self.generation = generation;
        }
    }
}

/// Turns a push-based producer into a synchronously retrievable image.
pub struct ImageFactory {
    id: FactoryId,
    source: Arc<dyn ImageProducer>,
    config: FactoryConfig,
    settings: RwLock<Settings>,
    cache: Mutex<Cache>,
    in_flight: Mutex<Option<AbortHandle>>,
    fetching: AtomicBool,
    notifier: Arc<ProgressNotifier>,
}

/// Clears the in-flight markers when a cycle ends, however it ends.
struct CycleGuard<'a> {
    factory: &'a ImageFactory,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.factory.in_flight.lock().take();
        self.factory.fetching.store(false, Ordering::Release);
    }
}

impl ImageFactory {
    /// Create a factory for `source` with the default configuration.
    pub fn new(source: Arc<dyn ImageProducer>) -> Self {
        Self::with_config(source, FactoryConfig::default())
    }

    /// Create a factory from an optional source.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::InvalidArgument`] if `source` is `None`.
    pub fn from_source(source: Option<Arc<dyn ImageProducer>>) -> FactoryResult<Self> {
        source
            .map(Self::new)
            .ok_or_else(|| FactoryError::InvalidArgument("source may not be absent".to_string()))
    }

    /// Create a factory with explicit configuration.
    pub fn with_config(source: Arc<dyn ImageProducer>, config: FactoryConfig) -> Self {
        Self {
            id: FactoryId::next(),
            source,
            config,
            settings: RwLock::new(Settings::default()),
            cache: Mutex::new(Cache::default()),
            in_flight: Mutex::new(None),
            fetching: AtomicBool::new(false),
            notifier: Arc::new(ProgressNotifier::new()),
        }
    }

    pub fn id(&self) -> FactoryId {
        self.id
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Currently configured region of interest.
    pub fn region(&self) -> Region {
        self.settings.read().region
    }

    /// Currently configured subsampling factors.
    pub fn subsampling(&self) -> Subsampling {
        self.settings.read().subsampling
    }

    /// Returns true while a fetch cycle is running.
    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    /// Set the region of interest. A different region discards cached results.
    pub fn set_region(&self, region: Region) {
        let mut settings = self.settings.write();
        if settings.region != region {
            debug!(factory = %self.id, region = %region, "Region changed, invalidating");
            settings.region = region;
            settings.generation += 1;
        }
    }

    /// Set the subsampling factors. Values below one are treated as one.
    ///
    /// Factors equal to the current ones (after normalization) keep cached results.
    pub fn set_subsampling(&self, x_step: i32, y_step: i32) {
        let subsampling = Subsampling::new(x_step, y_step);
        let mut settings = self.settings.write();
        if settings.subsampling != subsampling {
            debug!(
                factory = %self.id,
                x_step = subsampling.x_step(),
                y_step = subsampling.y_step(),
                "Subsampling changed, invalidating"
            );
            settings.subsampling = subsampling;
            settings.generation += 1;
        }
    }

    /// Abort the running fetch, if any, and drop every cached result.
    pub fn dispose(&self) {
        self.abort();
        self.settings.write().generation += 1;
        // A running fetch holds the cache; it discards its result on return
        if let Some(mut cache) = self.cache.try_lock() {
            cache.clear();
        }
        debug!(factory = %self.id, "Factory disposed");
    }

    /// Abort the running fetch.
    ///
    /// The waiting `get_image`/`get_encoding` call returns `Ok(None)` and the
    /// producer's further sends are refused. Does nothing if no fetch is
    /// running.
    pub fn abort(&self) {
        if let Some(handle) = self.in_flight.lock().as_ref() {
            debug!(factory = %self.id, "Aborting fetch");
            handle.abort();
        }
    }

    /// Return the image, fetching it if nothing is cached.
    ///
    /// Returns `Ok(None)` if the fetch was aborted.
    pub fn get_image(&self) -> FactoryResult<Option<Arc<MaterializedImage>>> {
        self.get_image_cancellable(&CancellationToken::new())
    }

    /// Like [`get_image`](Self::get_image), giving up with
    /// [`ConversionError::Interrupted`] once `cancel` is cancelled.
    pub fn get_image_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> FactoryResult<Option<Arc<MaterializedImage>>> {
        let mut cache = self.cache.lock();
        let settings = *self.settings.read();
        cache.sync(settings.generation);
        if let Some(image) = &cache.image {
            debug!(factory = %self.id, "Image cache hit");
            return Ok(Some(Arc::clone(image)));
        }

        let sink = self.run_cycle(settings, FetchMode::Pixels, cancel)?;
        let image = sink.lock().take_image()?.map(Arc::new);
        if self.is_current(settings.generation) {
            cache.image = image.clone();
        }
        Ok(image)
    }

    /// Return the encoding without transferring pixels if possible.
    ///
    /// A cached image answers directly. Otherwise an encoding-only fetch
    /// stops as soon as the producer reveals its encoding. Returns `Ok(None)`
    /// if the fetch was aborted or the producer finished without one.
    pub fn get_encoding(&self) -> FactoryResult<Option<Encoding>> {
        self.get_encoding_cancellable(&CancellationToken::new())
    }

    /// Like [`get_encoding`](Self::get_encoding), giving up with
    /// [`ConversionError::Interrupted`] once `cancel` is cancelled.
    pub fn get_encoding_cancellable(&self, cancel: &CancellationToken) -> FactoryResult<Option<Encoding>> {
        let mut cache = self.cache.lock();
        let settings = *self.settings.read();
        cache.sync(settings.generation);
        if let Some(image) = &cache.image {
            return Ok(Some(image.encoding().clone()));
        }
        if let Some(encoding) = &cache.encoding {
            return Ok(Some(encoding.clone()));
        }

        let sink = self.run_cycle(settings, FetchMode::EncodingOnly, cancel)?;
        let encoding = sink.lock().take_encoding()?;
        if self.is_current(settings.generation) {
            cache.encoding = encoding.clone();
        }
        Ok(encoding)
    }

    /// Register a progress listener.
    ///
    /// Listeners run on the thread that delivers the pixels: the caller's
    /// thread for synchronous producers, the producer's own thread otherwise.
    /// They may read or change the region and subsampling, call
    /// [`abort`](Self::abort) and manage listeners. Starting another fetch on
    /// the same factory from a callback deadlocks.
    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        self.notifier.add(listener)
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.notifier.remove(id)
    }

    pub fn remove_all_progress_listeners(&self) {
        self.notifier.clear();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.settings.read().generation == generation
    }

    fn run_cycle(
        &self,
        settings: Settings,
        mode: FetchMode,
        cancel: &CancellationToken,
    ) -> FactoryResult<Arc<Mutex<PixelSink>>> {
        let region = resolve_region(settings.region, settings.subsampling, mode);
        let source: Arc<dyn ImageProducer> = if mode == FetchMode::Pixels && settings.subsampling.is_active() {
            Arc::new(SubsamplingSource::new(Arc::clone(&self.source), settings.subsampling))
        } else {
            Arc::clone(&self.source)
        };

        let consumer = ConsumerId::next();
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(Mutex::new(PixelSink::new(
            self.id,
            consumer,
            Arc::clone(&source),
            mode,
            region,
            Arc::clone(&self.notifier),
            Arc::clone(&closed),
        )));
        let message_sink: Arc<Mutex<dyn MessageSink>> = sink.clone();
        let (sender, receiver) = production_channel(consumer, message_sink, closed);

        *self.in_flight.lock() = Some(receiver.abort_handle());
        self.fetching.store(true, Ordering::Release);
        let _guard = CycleGuard { factory: self };

        debug!(factory = %self.id, consumer = %consumer, mode = ?mode, region = %region, "Starting fetch cycle");
        source.start_production(sender);
        self.wait(&sink, &receiver, cancel)?;
        debug!(factory = %self.id, consumer = %consumer, region = %sink.lock().region(), "Fetch cycle finished");
        Ok(sink)
    }

    /// Block until the sink finishes, the fetch is aborted or cancelled, or
    /// the producer disappears.
    fn wait(
        &self,
        sink: &Mutex<PixelSink>,
        receiver: &ProductionReceiver,
        cancel: &CancellationToken,
    ) -> FactoryResult<()> {
        loop {
            if sink.lock().is_finished() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                debug!(factory = %self.id, "Fetch interrupted");
                sink.lock().complete(CompletionStatus::Aborted);
                return Err(ConversionError::Interrupted.into());
            }
            if receiver.abort_requested() {
                debug!(factory = %self.id, "Fetch aborted");
                sink.lock().complete(CompletionStatus::Aborted);
                return Ok(());
            }

            if receiver.wait(self.config.wait_interval) || !receiver.producer_dropped() {
                continue;
            }
            let mut sink = sink.lock();
            if !sink.is_finished() {
                warn!(factory = %self.id, "Producer went away without completing");
                sink.complete(CompletionStatus::Aborted);
                return Err(ConversionError::Disconnected.into());
            }
        }
    }
}

impl std::fmt::Debug for ImageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFactory")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("fetching", &self.is_fetching())
            .field("listeners", &self.notifier.len())
            .finish()
    }
}
