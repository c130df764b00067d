//! The consumer side of one fetch cycle.
//!
//! A [`PixelSink`] applies [`ProductionMessage`]s in arrival order: it derives
//! the target region from the announced dimensions, binds the encoding, clips
//! every tile against the region and copies what is left into a lazily
//! allocated [`PixelBuffer`]. Failures are recorded on the sink instead of
//! being raised, so the factory can report them on the caller's thread once
//! the cycle is over.
//!
//! Producers reach the sink through [`MessageSink`], so messages are applied
//! on whichever thread sends them. A sink lives for exactly one cycle.
//! Everything it accumulated moves out with [`PixelSink::take_image`] or
//! [`PixelSink::take_encoding`]; after that it only refuses messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{BufferError, PixelBuffer};
use crate::encoding::{Encoding, SampleKind};
use crate::error::{ConversionError, FactoryError, FactoryResult};
use crate::factory::{FactoryId, MaterializedImage};
use crate::geometry::{FetchMode, Region};
use crate::progress::{ProgressNotifier, ProgressTracker};
use crate::source::{
    CompletionStatus, ConsumerId, ImageProducer, MessageSink, ProductionMessage, Properties, Tile,
};

/// Mutable state of one fetch cycle.
#[derive(Debug, Default)]
struct FetchState {
    finished: bool,
    status: Option<CompletionStatus>,
    error: Option<FactoryError>,
    progress: ProgressTracker,
    tiles_copied: usize,
}

/// Accumulates one cycle's pixels.
pub(crate) struct PixelSink {
    factory: FactoryId,
    consumer: ConsumerId,
    source: Arc<dyn ImageProducer>,
    mode: FetchMode,
    region: Region,
    encoding: Option<Encoding>,
    buffer: Option<PixelBuffer>,
    properties: Option<Properties>,
    state: FetchState,
    notifier: Arc<ProgressNotifier>,
    closed: Arc<AtomicBool>,
}

/// A tile rectangle after clipping, in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clipped {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    offset: i64,
}

/// Clip a tile rectangle against `[region.x, region.x + width) × [region.y, region.y + height)`.
///
/// Returns `None` if nothing of the tile is left.
fn clip(tile: &Tile, region: Region) -> Option<Clipped> {
    let (rx, ry) = (i64::from(region.x), i64::from(region.y));
    let (rw, rh) = (i64::from(region.width), i64::from(region.height));
    let stride = i64::try_from(tile.stride).unwrap_or(i64::MAX);

    let mut c = Clipped {
        x: i64::from(tile.x),
        y: i64::from(tile.y),
        width: i64::from(tile.width),
        height: i64::from(tile.height),
        offset: i64::try_from(tile.offset).unwrap_or(i64::MAX),
    };

    if c.y < ry {
        let diff = ry - c.y;
        if diff >= c.height {
            return None;
        }
        c.offset = c.offset.saturating_add(stride.saturating_mul(diff));
        c.y += diff;
        c.height -= diff;
    }
    if c.y + c.height > ry + rh {
        c.height = ry + rh - c.y;
        if c.height <= 0 {
            return None;
        }
    }

    if c.x < rx {
        let diff = rx - c.x;
        if diff >= c.width {
            return None;
        }
        c.offset = c.offset.saturating_add(diff);
        c.x += diff;
        c.width -= diff;
    }
    if c.x + c.width > rx + rw {
        c.width = rx + rw - c.x;
        if c.width <= 0 {
            return None;
        }
    }

    Some(c)
}

impl PixelSink {
    pub(crate) fn new(
        factory: FactoryId,
        consumer: ConsumerId,
        source: Arc<dyn ImageProducer>,
        mode: FetchMode,
        region: Region,
        notifier: Arc<ProgressNotifier>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            factory,
            consumer,
            source,
            mode,
            region,
            encoding: None,
            buffer: None,
            properties: None,
            state: FetchState::default(),
            notifier,
            closed,
        }
    }

    /// Returns true once a completion has been applied.
    pub(crate) fn is_finished(&self) -> bool {
        self.state.finished
    }

    /// Target region as currently resolved.
    pub(crate) fn region(&self) -> Region {
        self.region
    }

    /// Apply one producer message. Messages after completion are ignored.
    pub(crate) fn apply(&mut self, message: ProductionMessage) {
        if self.state.finished {
            trace!(consumer = %self.consumer, "Ignoring message after completion");
            return;
        }

        match message {
            ProductionMessage::Dimensions { width, height } => self.announce_dimensions(width, height),
            ProductionMessage::Encoding(encoding) => {
                if let Err(e) = self.bind_encoding(encoding) {
                    self.fail(e);
                }
            }
            ProductionMessage::Tile(tile) => {
                if let Err(e) = self.deliver_tile(tile) {
                    self.fail(e);
                }
            }
            ProductionMessage::Properties(properties) => self.properties = Some(properties),
            ProductionMessage::Complete(status) => self.complete(status),
        }
    }

    fn announce_dimensions(&mut self, width: i32, height: i32) {
        self.region = self.region.with_source_extent(width, height);
        debug!(
            factory = %self.factory,
            source_width = width,
            source_height = height,
            region = %self.region,
            "Source dimensions announced"
        );

        if !self.region.has_area() {
            // Nothing to fetch; assembly decides what an empty region means
            self.complete(CompletionStatus::Done);
        }
    }

    fn bind_encoding(&mut self, encoding: Encoding) -> FactoryResult<()> {
        match &self.encoding {
            Some(bound) if *bound == encoding => {}
            Some(bound) => {
                if self.buffer.is_some() {
                    return Err(FactoryError::InconsistentSource(format!(
                        "encoding changed from {:?} to {:?} after pixel delivery",
                        bound, encoding
                    )));
                }
                debug!(factory = %self.factory, "Rebinding encoding before first pixels");
                self.encoding = Some(encoding);
            }
            None => self.encoding = Some(encoding),
        }

        if self.mode == FetchMode::EncodingOnly {
            self.complete(CompletionStatus::Aborted);
        }
        Ok(())
    }

    fn deliver_tile(&mut self, tile: Tile) -> FactoryResult<()> {
        self.bind_encoding(tile.encoding.clone())?;
        if self.state.finished {
            return Ok(());
        }

        let clipped = clip(&tile, self.region);
        let Tile {
            x: tile_x,
            y: tile_y,
            width: tile_width,
            height: tile_height,
            encoding,
            samples,
            stride,
            ..
        } = tile;
        let samples = if encoding.kind() == SampleKind::Short && samples.kind() == SampleKind::Int {
            samples.narrow_to_shorts()
        } else {
            samples
        };
        if samples.kind() != encoding.kind() {
            return Err(FactoryError::InconsistentSource(format!(
                "{} samples delivered for a {} encoding",
                samples.kind(),
                encoding.kind()
            )));
        }

        if self.region.width_is_unresolved() || self.region.height_is_unresolved() {
            return Err(ConversionError::MalformedTile(
                "pixels delivered before the source dimensions".to_string(),
            )
            .into());
        }
        if tile_width < 0 || tile_height < 0 {
            return Err(ConversionError::MalformedTile(format!(
                "negative tile extent {}×{}",
                tile_width, tile_height
            ))
            .into());
        }
        if !self.region.has_area() {
            return Ok(());
        }

        let region = self.region;
        let buffer = self
            .buffer
            .get_or_insert_with(|| PixelBuffer::allocate(samples.kind(), region.width as u32, region.height as u32));
        if buffer.kind() != samples.kind() {
            return Err(FactoryError::InconsistentSource(format!(
                "{} samples delivered into a {} buffer",
                samples.kind(),
                buffer.kind()
            )));
        }

        let Some(clipped) = clipped else {
            trace!(x = tile_x, y = tile_y, "Tile outside region");
            return Ok(());
        };

        let dst_x = (clipped.x - i64::from(region.x)) as u32;
        let dst_y = (clipped.y - i64::from(region.y)) as u32;
        buffer
            .write_block(
                dst_x,
                dst_y,
                clipped.width as u32,
                clipped.height as u32,
                &samples,
                clipped.offset as usize,
                stride,
            )
            .map_err(|e| match e {
                BufferError::KindMismatch { .. } => FactoryError::InconsistentSource(e.to_string()),
                other => ConversionError::MalformedTile(other.to_string()).into(),
            })?;

        self.state.tiles_copied += 1;
        trace!(
            x = clipped.x,
            y = clipped.y,
            width = clipped.width,
            height = clipped.height,
            "Tile copied"
        );
        self.report_progress(dst_y + clipped.height as u32);
        Ok(())
    }

    fn report_progress(&mut self, rows: u32) {
        if self.notifier.is_empty() {
            return;
        }
        if let Some(percent) = self.state.progress.advance(rows, self.region.height as u32) {
            self.notifier.notify(self.factory, percent);
        }
    }

    /// Record a fatal error and end the cycle.
    fn fail(&mut self, error: FactoryError) {
        warn!(factory = %self.factory, consumer = %self.consumer, error = %error, "Fetch cycle failed");
        if self.state.error.is_none() {
            self.state.error = Some(error);
        }
        self.complete(CompletionStatus::Aborted);
    }

    /// Mark the cycle finished and detach from the source. Idempotent.
    pub(crate) fn complete(&mut self, status: CompletionStatus) {
        if self.state.finished {
            return;
        }
        self.state.finished = true;
        self.closed.store(true, Ordering::Release);
        self.source.remove_consumer(self.consumer);

        if let CompletionStatus::Failed(reason) = &status {
            if self.state.error.is_none() {
                self.state.error = Some(ConversionError::SourceFailed(reason.clone()).into());
            }
        }
        debug!(
            factory = %self.factory,
            consumer = %self.consumer,
            status = ?status,
            tiles = self.state.tiles_copied,
            "Fetch cycle completed"
        );
        self.state.status = Some(status);
    }

    fn aborted(&self) -> bool {
        matches!(self.state.status, Some(CompletionStatus::Aborted))
    }

    /// Assemble the image of a full-pixel cycle, moving the pixels out.
    ///
    /// Returns `Ok(None)` if the cycle was aborted.
    pub(crate) fn take_image(&mut self) -> FactoryResult<Option<MaterializedImage>> {
        if let Some(error) = self.state.error.take() {
            return Err(error);
        }
        if self.aborted() {
            return Ok(None);
        }
        if !self.region.has_area() {
            return Err(ConversionError::EmptyImage {
                width: self.region.width,
                height: self.region.height,
            }
            .into());
        }

        let encoding = self.encoding.take().unwrap_or_else(Encoding::argb);
        let buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => PixelBuffer::allocate(encoding.kind(), self.region.width as u32, self.region.height as u32),
        };
        Ok(Some(MaterializedImage::new(
            buffer,
            encoding,
            self.properties.take().unwrap_or_default(),
        )))
    }

    /// The encoding found by an encoding-only cycle.
    pub(crate) fn take_encoding(&mut self) -> FactoryResult<Option<Encoding>> {
        match self.state.error.take() {
            Some(error) => Err(error),
            None => Ok(self.encoding.take()),
        }
    }
}

impl MessageSink for PixelSink {
    fn accept(&mut self, message: ProductionMessage) {
        self.apply(message);
    }

    fn is_finished(&self) -> bool {
        PixelSink::is_finished(self)
    }
}
