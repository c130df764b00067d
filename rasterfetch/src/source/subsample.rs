//! Subsampling decorator.
//!
//! Keeps every `x_step`-th column and `y_step`-th row of the wrapped producer,
//! starting at the source origin. Source sample `(sx, sy)` becomes sample
//! `(sx / x_step, sy / y_step)`, so the announced extent is the ceiling of
//! the source extent divided by the step.

use std::sync::Arc;

use tracing::trace;

use super::{
    CompletionStatus, ConsumerId, ImageProducer, PixelSender, ProductionClosed, ProductionFilter,
    ProductionMessage, Tile,
};
use crate::geometry::{ceil_div, Subsampling};

/// Wraps a producer so that it delivers a subsampled image.
pub struct SubsamplingSource {
    inner: Arc<dyn ImageProducer>,
    subsampling: Subsampling,
}

impl SubsamplingSource {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn ImageProducer>, subsampling: Subsampling) -> Self {
        Self { inner, subsampling }
    }

    /// Factors applied by this decorator.
    pub fn subsampling(&self) -> Subsampling {
        self.subsampling
    }
}

impl ImageProducer for SubsamplingSource {
    fn start_production(&self, sender: PixelSender) {
        let filter = SubsampleFilter {
            x_step: i64::from(self.subsampling.x_step()),
            y_step: i64::from(self.subsampling.y_step()),
        };
        self.inner.start_production(sender.with_filter(Arc::new(filter)));
    }

    fn remove_consumer(&self, consumer: ConsumerId) {
        self.inner.remove_consumer(consumer);
    }
}

struct SubsampleFilter {
    x_step: i64,
    y_step: i64,
}

/// First multiple of `step` at or after `start`.
fn first_multiple(start: i64, step: i64) -> i64 {
    start + (step - start.rem_euclid(step)) % step
}

/// Number of multiples of `step` in `[first, end)`, with `first` a multiple.
fn count_from(first: i64, end: i64, step: i64) -> i64 {
    if first >= end {
        0
    } else {
        (end - first + step - 1) / step
    }
}

impl SubsampleFilter {
    fn subsample_tile(&self, tile: Tile, downstream: &PixelSender) -> Result<(), ProductionClosed> {
        if tile.width <= 0 || tile.height <= 0 {
            return Ok(());
        }

        let (tx, ty) = (i64::from(tile.x), i64::from(tile.y));
        let x0 = first_multiple(tx, self.x_step);
        let y0 = first_multiple(ty, self.y_step);
        let cols = count_from(x0, tx + i64::from(tile.width), self.x_step);
        let rows = count_from(y0, ty + i64::from(tile.height), self.y_step);
        if cols == 0 || rows == 0 {
            trace!(x = tile.x, y = tile.y, "Tile falls between sampled rows or columns");
            return Ok(());
        }

        let short_tile = || {
            CompletionStatus::Failed(format!(
                "tile at {},{} is shorter than its {}×{} geometry",
                tile.x, tile.y, tile.width, tile.height
            ))
        };
        if cols.saturating_mul(rows) > tile.samples.len() as i64 {
            return downstream.complete(short_tile());
        }

        let stride = i64::try_from(tile.stride).unwrap_or(i64::MAX);
        let offset = i64::try_from(tile.offset).unwrap_or(i64::MAX);
        let mut indices = Vec::with_capacity((cols * rows) as usize);
        for r in 0..rows {
            let row_base = offset.saturating_add((y0 + r * self.y_step - ty).saturating_mul(stride));
            for c in 0..cols {
                indices.push(row_base.saturating_add(x0 + c * self.x_step - tx) as usize);
            }
        }

        match tile.samples.gather(&indices) {
            Some(samples) => downstream.tile(Tile::new(
                (x0 / self.x_step) as i32,
                (y0 / self.y_step) as i32,
                cols as i32,
                rows as i32,
                tile.encoding,
                samples,
            )),
            None => downstream.complete(short_tile()),
        }
    }
}

impl ProductionFilter for SubsampleFilter {
    fn filter(&self, message: ProductionMessage, downstream: &PixelSender) -> Result<(), ProductionClosed> {
        match message {
            ProductionMessage::Dimensions { width, height } => downstream.dimensions(
                ceil_div(width, self.x_step as u32),
                ceil_div(height, self.y_step as u32),
            ),
            ProductionMessage::Tile(tile) => self.subsample_tile(tile, downstream),
            other => downstream.send(other),
        }
    }
}
