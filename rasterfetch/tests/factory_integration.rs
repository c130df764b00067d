//! Integration tests for the image factory.
//!
//! These tests drive `ImageFactory` end to end against in-memory, threaded and
//! scripted producers:
//! - caching and invalidation
//! - region clipping and subsampling
//! - synchronous vs asynchronous delivery
//! - abort, cancellation and vanished producers
//! - producer errors and encoding violations
//!
//! Run with: `cargo test --test factory_integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rasterfetch::source::ProductionMessage;
use rasterfetch::{
    CompletionStatus, ConversionError, Encoding, FactoryConfig, FactoryError, FactoryId, ImageFactory,
    ImageProducer, MemorySource, PixelSender, Region, SampleData, ThreadedSource, Tile, TileOrder,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// ARGB ramp where the sample at `(x, y)` is `y * width + x`.
fn ramp(width: u32, height: u32) -> MemorySource {
    let samples = (0..width * height).collect();
    MemorySource::new(width, height, Encoding::argb(), SampleData::Ints(samples)).unwrap()
}

fn fast_config() -> FactoryConfig {
    FactoryConfig::default().with_wait_interval(Duration::from_millis(5))
}

/// Replays a fixed message script, optionally keeping the sender alive afterwards.
struct ScriptedSource {
    script: Vec<ProductionMessage>,
    keep_alive: bool,
    held: Mutex<Vec<PixelSender>>,
}

impl ScriptedSource {
    fn new(script: Vec<ProductionMessage>) -> Self {
        Self {
            script,
            keep_alive: false,
            held: Mutex::new(Vec::new()),
        }
    }

    fn stalled(script: Vec<ProductionMessage>) -> Self {
        Self {
            keep_alive: true,
            ..Self::new(script)
        }
    }
}

impl ImageProducer for ScriptedSource {
    fn start_production(&self, sender: PixelSender) {
        for message in &self.script {
            if sender.send(message.clone()).is_err() {
                return;
            }
        }
        if self.keep_alive {
            self.held.lock().push(sender);
        }
    }
}

/// Pushes a 4-wide gray image one row at a time and counts the rows the sink took.
struct RowCounter {
    rows: i32,
    drift_at: Option<i32>,
    accepted: AtomicUsize,
}

impl RowCounter {
    fn new(rows: i32) -> Self {
        Self {
            rows,
            drift_at: None,
            accepted: AtomicUsize::new(0),
        }
    }

    /// Switch row `row` to an ARGB encoding.
    fn drifting_at(rows: i32, row: i32) -> Self {
        Self {
            drift_at: Some(row),
            ..Self::new(rows)
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl ImageProducer for RowCounter {
    fn start_production(&self, sender: PixelSender) {
        let _ = sender.dimensions(4, self.rows);
        let _ = sender.encoding(Encoding::gray8());
        for y in 0..self.rows {
            let tile = if self.drift_at == Some(y) {
                Tile::new(0, y, 4, 1, Encoding::argb(), SampleData::Ints(vec![0; 4]))
            } else {
                Tile::new(0, y, 4, 1, Encoding::gray8(), SampleData::Bytes(vec![y as u8; 4]))
            };
            if sender.tile(tile).is_ok() {
                self.accepted.fetch_add(1, Ordering::SeqCst);
            }
        }
        let _ = sender.complete(CompletionStatus::Done);
    }
}

fn gray_tile(x: i32, y: i32, width: i32, height: i32) -> ProductionMessage {
    let samples = vec![0u8; (width * height) as usize];
    ProductionMessage::Tile(Tile::new(x, y, width, height, Encoding::gray8(), SampleData::Bytes(samples)))
}

fn recorder(factory: &ImageFactory) -> Arc<Mutex<Vec<u32>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    factory.add_progress_listener(Arc::new(move |_factory: FactoryId, percent: u32| {
        seen_clone.lock().push(percent);
    }));
    seen
}

// ============================================================================
// Caching and invalidation
// ============================================================================

#[test]
fn test_get_image_is_idempotent() {
    let source = Arc::new(ramp(8, 8).with_tile_size(3, 3));
    let factory = ImageFactory::new(source.clone());

    let first = factory.get_image().unwrap().expect("image");
    let second = factory.get_image().unwrap().expect("image");

    assert!(Arc::ptr_eq(&first, &second), "Second call should return the cached image");
    assert_eq!(source.production_count(), 1, "Only one production should run");
}

#[test]
fn test_only_changes_invalidate() {
    let source = Arc::new(ramp(8, 8));
    let factory = ImageFactory::new(source.clone());
    factory.get_image().unwrap();

    factory.set_region(factory.region());
    factory.set_subsampling(1, 1);
    factory.set_subsampling(-5, 0);
    factory.get_image().unwrap();
    assert_eq!(source.production_count(), 1, "Equal settings must not refetch");

    factory.set_subsampling(2, 1);
    factory.get_image().unwrap();
    assert_eq!(source.production_count(), 2);

    factory.set_region(Region::new(1, 1, 2, 2));
    factory.get_image().unwrap();
    assert_eq!(source.production_count(), 3);
}

#[test]
fn test_dispose_discards_cache() {
    let source = Arc::new(ramp(4, 4));
    let factory = ImageFactory::new(source.clone());
    factory.get_image().unwrap();
    factory.dispose();
    factory.get_image().unwrap();
    assert_eq!(source.production_count(), 2);
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_region_is_clipped_from_single_tile() {
    let factory = ImageFactory::new(Arc::new(ramp(50, 50).with_tile_size(50, 50)));
    factory.set_region(Region::new(10, 10, 20, 20));

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (20, 20));
    assert_eq!(image.sample(0, 0), Some(10 * 50 + 10));
    assert_eq!(image.sample(19, 19), Some(29 * 50 + 29));
}

#[test]
fn test_region_extending_past_source_keeps_cleared_margin() {
    let factory = ImageFactory::new(Arc::new(ramp(4, 4)));
    factory.set_region(Region::new(2, 2, 4, 4));

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (4, 4));
    assert_eq!(image.sample(1, 1), Some(3 * 4 + 3));
    assert_eq!(image.sample(2, 2), Some(0), "Undelivered pixels stay zero");
}

#[test]
fn test_full_extent_sentinel_derived_from_offset() {
    let factory = ImageFactory::new(Arc::new(ramp(10, 6)));
    factory.set_region(Region::new(4, 1, Region::FULL_EXTENT, Region::FULL_EXTENT));

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (6, 5));
    assert_eq!(image.sample(0, 0), Some(10 + 4));
}

#[test]
fn test_offset_past_source_is_empty_image() {
    let factory = ImageFactory::new(Arc::new(ramp(8, 4)));
    factory.set_region(Region::new(8, 0, Region::FULL_EXTENT, Region::FULL_EXTENT));

    assert_eq!(
        factory.get_image(),
        Err(FactoryError::Conversion(ConversionError::EmptyImage { width: 0, height: 4 }))
    );
}

#[test]
fn test_subsampled_full_image() {
    let factory = ImageFactory::new(Arc::new(ramp(10, 7).with_tile_size(4, 3)));
    factory.set_subsampling(3, 2);

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (4, 4));
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(image.sample(x, y), Some(2 * y * 10 + 3 * x), "Sample ({}, {})", x, y);
        }
    }
}

#[test]
fn test_subsampled_region_is_rescaled() {
    let factory = ImageFactory::new(Arc::new(ramp(12, 8).with_tile_size(5, 5)));
    factory.set_region(Region::new(3, 2, 6, 4));
    factory.set_subsampling(3, 2);

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (2, 2));
    assert_eq!(image.sample(0, 0), Some(2 * 12 + 3));
    assert_eq!(image.sample(1, 1), Some(4 * 12 + 6));
}

#[test]
fn test_negative_origin_is_rescaled() {
    let factory = ImageFactory::new(Arc::new(ramp(12, 9).with_tile_size(5, 5)));
    factory.set_region(Region::new(-5, -4, 10, 9));
    factory.set_subsampling(3, 3);

    // Origin (-5, -4) lands on grid cell (-1, -1); source (0, 0) is at (1, 1)
    let image = factory.get_image().unwrap().expect("image");
    assert_eq!((image.width(), image.height()), (4, 3));
    assert_eq!(image.sample(1, 1), Some(0));
    assert_eq!(image.sample(2, 1), Some(3));
    assert_eq!(image.sample(1, 2), Some(3 * 12));
    assert_eq!(image.sample(3, 2), Some(3 * 12 + 6));
}

// ============================================================================
// Delivery models
// ============================================================================

#[test]
fn test_sync_and_threaded_sources_agree() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let sync = ImageFactory::new(Arc::new(ramp(33, 17).with_tile_size(8, 5)));
    let threaded_inner = Arc::new(ramp(33, 17).with_tile_size(8, 5).with_order(TileOrder::Shuffled(42)));
    let threaded = ImageFactory::new(Arc::new(ThreadedSource::new(threaded_inner, runtime.handle().clone())));

    for factory in [&sync, &threaded] {
        factory.set_region(Region::new(3, 2, 25, 12));
    }

    let a = sync.get_image().unwrap().expect("image");
    let b = threaded.get_image().unwrap().expect("image");
    assert_eq!(a.buffer(), b.buffer());
}

#[test]
fn test_bottom_up_delivery_matches_top_down() {
    let top = ImageFactory::new(Arc::new(ramp(9, 9).with_tile_size(2, 2)));
    let bottom = ImageFactory::new(Arc::new(ramp(9, 9).with_tile_size(2, 2).with_order(TileOrder::BottomUp)));

    assert_eq!(
        top.get_image().unwrap().expect("image").buffer(),
        bottom.get_image().unwrap().expect("image").buffer()
    );
}

// ============================================================================
// Abort, cancellation, vanished producers
// ============================================================================

#[test]
fn test_abort_from_another_thread_unblocks_fetch() {
    let source = ScriptedSource::stalled(vec![ProductionMessage::Dimensions { width: 4, height: 4 }]);
    let factory = Arc::new(ImageFactory::with_config(Arc::new(source), fast_config()));

    let aborter = {
        let factory = Arc::clone(&factory);
        thread::spawn(move || {
            while !factory.is_fetching() {
                thread::sleep(Duration::from_millis(1));
            }
            factory.abort();
        })
    };

    assert_eq!(factory.get_image(), Ok(None), "Aborted fetch yields no image");
    aborter.join().unwrap();
    assert!(!factory.is_fetching());
}

#[test]
fn test_cancellation_interrupts_stalled_fetch() {
    let source = ScriptedSource::stalled(vec![]);
    let factory = ImageFactory::with_config(Arc::new(source), fast_config());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        })
    };

    assert_eq!(
        factory.get_encoding_cancellable(&cancel),
        Err(FactoryError::Conversion(ConversionError::Interrupted))
    );
    canceller.join().unwrap();
}

#[test]
fn test_dropped_sender_is_disconnected() {
    let source = ScriptedSource::new(vec![
        ProductionMessage::Dimensions { width: 2, height: 2 },
        gray_tile(0, 0, 2, 1),
    ]);
    let factory = ImageFactory::with_config(Arc::new(source), fast_config());

    assert_eq!(
        factory.get_image(),
        Err(FactoryError::Conversion(ConversionError::Disconnected))
    );
}

// ============================================================================
// Producer errors
// ============================================================================

#[test]
fn test_failed_production_is_conversion_error() {
    let source = ScriptedSource::new(vec![
        ProductionMessage::Dimensions { width: 2, height: 2 },
        ProductionMessage::Complete(CompletionStatus::Failed("decoder exploded".to_string())),
    ]);
    let factory = ImageFactory::new(Arc::new(source));

    assert_eq!(
        factory.get_image(),
        Err(FactoryError::Conversion(ConversionError::SourceFailed(
            "decoder exploded".to_string()
        )))
    );
}

#[test]
fn test_encoding_drift_is_inconsistent_source() {
    let source = ScriptedSource::new(vec![
        ProductionMessage::Dimensions { width: 2, height: 2 },
        gray_tile(0, 0, 2, 1),
        ProductionMessage::Tile(Tile::new(0, 1, 2, 1, Encoding::argb(), SampleData::Ints(vec![0, 0]))),
        ProductionMessage::Complete(CompletionStatus::Done),
    ]);
    let factory = ImageFactory::new(Arc::new(source));

    let err = factory.get_image().unwrap_err();
    assert!(err.is_inconsistent_source(), "Unexpected error: {}", err);
}

#[test]
fn test_encoding_drift_stops_synchronous_producer() {
    let source = Arc::new(RowCounter::drifting_at(100, 10));
    let factory = ImageFactory::new(source.clone());

    let err = factory.get_image().unwrap_err();
    assert!(err.is_inconsistent_source(), "Unexpected error: {}", err);
    // Rows 0..=10 reach the sink; the failure refuses everything after the drift
    assert_eq!(source.accepted(), 11);
}

#[test]
fn test_malformed_tile_does_not_panic() {
    let source = ScriptedSource::new(vec![
        ProductionMessage::Dimensions { width: 4, height: 4 },
        ProductionMessage::Tile(
            Tile::new(0, 0, 4, 4, Encoding::gray8(), SampleData::Bytes(vec![0; 16])).with_layout(0, 2),
        ),
        ProductionMessage::Complete(CompletionStatus::Done),
    ]);
    let factory = ImageFactory::new(Arc::new(source));

    assert!(matches!(
        factory.get_image(),
        Err(FactoryError::Conversion(ConversionError::MalformedTile(_)))
    ));
}

// ============================================================================
// Encoding-only fetch
// ============================================================================

#[test]
fn test_encoding_only_stops_before_pixels() {
    // The tile after the encoding is malformed; it must never be applied
    let source = ScriptedSource::new(vec![
        ProductionMessage::Dimensions { width: 4, height: 4 },
        ProductionMessage::Encoding(Encoding::rgb565()),
        ProductionMessage::Tile(Tile::new(0, 0, 4, 4, Encoding::rgb565(), SampleData::Shorts(vec![0; 2]))),
        ProductionMessage::Complete(CompletionStatus::Done),
    ]);
    let factory = ImageFactory::new(Arc::new(source));

    assert_eq!(factory.get_encoding(), Ok(Some(Encoding::rgb565())));
}

#[test]
fn test_encoding_only_transfers_no_tiles() {
    let source = Arc::new(RowCounter::new(100));
    let factory = ImageFactory::new(source.clone());

    assert_eq!(factory.get_encoding(), Ok(Some(Encoding::gray8())));
    assert_eq!(source.accepted(), 0, "Tiles accepted during an encoding-only fetch");

    factory.get_image().unwrap().expect("image");
    assert_eq!(source.accepted(), 100);
}

#[test]
fn test_encoding_only_ignores_subsampling() {
    let source = Arc::new(ramp(4, 4));
    let factory = ImageFactory::new(source.clone());
    factory.set_subsampling(2, 2);
    assert_eq!(factory.get_encoding(), Ok(Some(Encoding::argb())));
}

// ============================================================================
// Samples, properties, progress
// ============================================================================

#[test]
fn test_int_samples_narrowed_for_gray16() {
    let samples = SampleData::Ints(vec![0x0001_0002, 0xabcd_ef01, 0xffff, 0x7_0000]);
    let source = MemorySource::new(2, 2, Encoding::gray16(), samples).unwrap();
    let factory = ImageFactory::new(Arc::new(source));

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!(image.buffer().data(), &SampleData::Shorts(vec![0x0002, 0xef01, 0xffff, 0]));
}

#[test]
fn test_properties_are_attached() {
    let mut properties = rasterfetch::source::Properties::new();
    properties.insert("comment".to_string(), "made in a test".to_string());
    let factory = ImageFactory::new(Arc::new(ramp(2, 2).with_properties(properties)));

    let image = factory.get_image().unwrap().expect("image");
    assert_eq!(image.property("comment"), Some("made in a test"));
}

#[test]
fn test_progress_restarts_each_cycle() {
    let factory = ImageFactory::new(Arc::new(ramp(4, 4).with_tile_size(4, 1)));
    let seen = recorder(&factory);

    factory.get_image().unwrap();
    assert_eq!(*seen.lock(), vec![25, 50, 75, 100]);

    factory.set_region(Region::new(0, 0, 4, 2));
    factory.get_image().unwrap();
    assert_eq!(*seen.lock(), vec![25, 50, 75, 100, 50, 100]);
}

#[test]
fn test_progress_ignores_late_rows_out_of_order() {
    let factory = ImageFactory::new(Arc::new(ramp(4, 4).with_tile_size(4, 1).with_order(TileOrder::BottomUp)));
    let seen = recorder(&factory);

    factory.get_image().unwrap();
    assert_eq!(*seen.lock(), vec![100], "First delivered tile already reaches the last row");
}

#[test]
fn test_removed_listener_is_not_called() {
    let factory = ImageFactory::new(Arc::new(ramp(2, 2)));
    let seen = Arc::new(Mutex::new(0));
    let seen_clone = Arc::clone(&seen);
    let id = factory.add_progress_listener(Arc::new(move |_f: FactoryId, _p: u32| *seen_clone.lock() += 1));

    assert!(factory.remove_progress_listener(id));
    factory.get_image().unwrap();
    assert_eq!(*seen.lock(), 0);

    let _ = recorder(&factory);
    factory.remove_all_progress_listeners();
    factory.set_region(Region::new(0, 0, 1, 1));
    factory.get_image().unwrap();
}

#[test]
fn test_listener_receives_factory_id() {
    let factory = ImageFactory::new(Arc::new(ramp(2, 2)));
    let ids = Arc::new(Mutex::new(Vec::new()));
    let ids_clone = Arc::clone(&ids);
    factory.add_progress_listener(Arc::new(move |id: FactoryId, _p: u32| ids_clone.lock().push(id)));

    factory.get_image().unwrap();
    assert!(!ids.lock().is_empty());
    assert!(ids.lock().iter().all(|id| *id == factory.id()));
}
