//! In-memory tiled producer.
//!
//! [`MemorySource`] holds a complete sample array and replays it as a
//! sequence of tiles. It delivers synchronously on the caller's thread; wrap it
//! in a [`ThreadedSource`](super::ThreadedSource) to deliver asynchronously.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::trace;

use super::{CompletionStatus, ImageProducer, PixelSender, Properties, Tile};
use crate::buffer::SampleData;
use crate::encoding::{Encoding, SampleKind};
use crate::error::{FactoryError, FactoryResult};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Order in which tiles are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileOrder {
    /// Row of tiles by row of tiles, top to bottom.
    #[default]
    TopDown,
    /// Bottom row of tiles first.
    BottomUp,
    /// A seeded random permutation.
    Shuffled(u64),
}

/// Replays an in-memory image as tiles.
pub struct MemorySource {
    width: u32,
    height: u32,
    encoding: Encoding,
    samples: Arc<SampleData>,
    tile_width: u32,
    tile_height: u32,
    order: TileOrder,
    properties: Option<Properties>,
    announce_encoding: bool,
    productions: AtomicUsize,
}

impl MemorySource {
    /// Create a source over `width * height` samples.
    ///
    /// The samples must match the encoding's element kind. 32-bit samples are
    /// also accepted for a 16-bit encoding, mirroring producers that can only
    /// push packed words.
    pub fn new(width: u32, height: u32, encoding: Encoding, samples: SampleData) -> FactoryResult<Self> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FactoryError::InvalidArgument(format!(
                "{}×{} source needs {} samples, got {}",
                width,
                height,
                expected,
                samples.len()
            )));
        }

        let kind_ok = samples.kind() == encoding.kind()
            || (samples.kind() == SampleKind::Int && encoding.kind() == SampleKind::Short);
        if !kind_ok {
            return Err(FactoryError::InvalidArgument(format!(
                "{} samples cannot carry a {} encoding",
                samples.kind(),
                encoding.kind()
            )));
        }

        Ok(Self {
            width,
            height,
            encoding,
            samples: Arc::new(samples),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            order: TileOrder::default(),
            properties: None,
            announce_encoding: true,
            productions: AtomicUsize::new(0),
        })
    }

    /// Set the tile size. Zero is treated as one.
    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width.max(1);
        self.tile_height = height.max(1);
        self
    }

    /// Set the delivery order.
    pub fn with_order(mut self, order: TileOrder) -> Self {
        self.order = order;
        self
    }

    /// Attach properties, pushed before the first tile.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Skip the encoding announcement; the encoding then only arrives with tiles.
    pub fn without_encoding_announcement(mut self) -> Self {
        self.announce_encoding = false;
        self
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encoding of every tile.
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Number of times production has been started.
    pub fn production_count(&self) -> usize {
        self.productions.load(Ordering::SeqCst)
    }

    /// Tile rectangles `(x, y, width, height)` in delivery order.
    pub fn tile_rects(&self) -> Vec<(u32, u32, u32, u32)> {
        let mut rows: Vec<Vec<(u32, u32, u32, u32)>> = (0..self.height)
            .step_by(self.tile_height as usize)
            .map(|y| {
                (0..self.width)
                    .step_by(self.tile_width as usize)
                    .map(|x| {
                        (
                            x,
                            y,
                            self.tile_width.min(self.width - x),
                            self.tile_height.min(self.height - y),
                        )
                    })
                    .collect()
            })
            .collect();

        match self.order {
            TileOrder::TopDown => rows.into_iter().flatten().collect(),
            TileOrder::BottomUp => {
                rows.reverse();
                rows.into_iter().flatten().collect()
            }
            TileOrder::Shuffled(seed) => {
                let mut rects: Vec<_> = rows.into_iter().flatten().collect();
                rects.shuffle(&mut StdRng::seed_from_u64(seed));
                rects
            }
        }
    }

    fn extract(&self, x: u32, y: u32, cols: u32, rows: u32) -> Result<SampleData, String> {
        let mut data = SampleData::zeroed(self.samples.kind(), cols as usize * rows as usize);
        data.copy_block(
            0,
            cols as usize,
            &self.samples,
            y as usize * self.width as usize + x as usize,
            self.width as usize,
            cols as usize,
            rows as usize,
        )
        .map_err(|e| e.to_string())?;
        Ok(data)
    }

    fn produce(&self, sender: &PixelSender) -> Result<(), super::ProductionClosed> {
        sender.dimensions(self.width as i32, self.height as i32)?;
        if self.announce_encoding {
            sender.encoding(self.encoding.clone())?;
        }
        if let Some(properties) = &self.properties {
            sender.properties(properties.clone())?;
        }

        for (x, y, cols, rows) in self.tile_rects() {
            if sender.is_closed() {
                trace!(consumer = %sender.consumer(), "Consumer closed, stopping tile replay");
                return Ok(());
            }
            match self.extract(x, y, cols, rows) {
                Ok(samples) => sender.tile(Tile::new(
                    x as i32,
                    y as i32,
                    cols as i32,
                    rows as i32,
                    self.encoding.clone(),
                    samples,
                ))?,
                Err(reason) => return sender.complete(CompletionStatus::Failed(reason)),
            }
        }

        sender.complete(CompletionStatus::Done)
    }
}

impl ImageProducer for MemorySource {
    fn start_production(&self, sender: PixelSender) {
        self.productions.fetch_add(1, Ordering::SeqCst);
        // A closed consumer is not an error for the producer
        let _ = self.produce(&sender);
    }
}

impl std::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .field("tile", &(self.tile_width, self.tile_height))
            .field("order", &self.order)
            .finish()
    }
}
