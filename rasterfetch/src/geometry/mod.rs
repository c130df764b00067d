//! Region of interest and subsampling geometry.
//!
//! The resolver is a pure function of the configured region, the subsampling
//! factors and the kind of fetch. It never touches the configured values, so
//! repeated fetches against the same configuration always resolve the same way.
//!
//! ```
//! use rasterfetch::geometry::{resolve_region, FetchMode, Region, Subsampling};
//!
//! let region = Region::new(10, 10, 100, 100);
//! let resolved = resolve_region(region, Subsampling::new(3, 3), FetchMode::Pixels);
//! assert_eq!(resolved, Region::new(4, 4, 34, 34));
//! ```

use serde::{Deserialize, Serialize};

/// Source sub-rectangle selected for materialization.
///
/// A `width` or `height` of [`Region::FULL_EXTENT`] means "up to the edge of
/// the source", resolved once the source announces its dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    /// Sentinel extent meaning "use the full source extent".
    pub const FULL_EXTENT: i32 = -1;

    /// Create a region.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole source, starting at the origin.
    pub fn full() -> Self {
        Self::new(0, 0, Self::FULL_EXTENT, Self::FULL_EXTENT)
    }

    /// Returns true if the width still waits on the source extent.
    pub fn width_is_unresolved(&self) -> bool {
        self.width < 0
    }

    /// Returns true if the height still waits on the source extent.
    pub fn height_is_unresolved(&self) -> bool {
        self.height < 0
    }

    /// Returns true if both extents are positive.
    pub fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Fill sentinel extents from the announced source size.
    ///
    /// An explicit extent is kept as configured.
    pub fn with_source_extent(self, source_width: i32, source_height: i32) -> Self {
        let width = if self.width_is_unresolved() {
            source_width - self.x
        } else {
            self.width
        };
        let height = if self.height_is_unresolved() {
            source_height - self.y
        } else {
            self.height
        };
        Self { width, height, ..self }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::full()
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{} {}×{}", self.x, self.y, self.width, self.height)
    }
}

/// Per-axis sampling stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subsampling {
    x_step: u32,
    y_step: u32,
}

impl Subsampling {
    /// Create subsampling factors. Values below 1 are normalized to 1.
    pub fn new(x_step: i32, y_step: i32) -> Self {
        Self {
            x_step: x_step.max(1) as u32,
            y_step: y_step.max(1) as u32,
        }
    }

    /// No subsampling.
    pub fn none() -> Self {
        Self::new(1, 1)
    }

    /// Horizontal step.
    pub fn x_step(&self) -> u32 {
        self.x_step
    }

    /// Vertical step.
    pub fn y_step(&self) -> u32 {
        self.y_step
    }

    /// Returns true if either axis skips samples.
    pub fn is_active(&self) -> bool {
        self.x_step > 1 || self.y_step > 1
    }
}

impl Default for Subsampling {
    fn default() -> Self {
        Self::none()
    }
}

/// What a fetch cycle is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Transfer every pixel of the region.
    Pixels,
    /// Stop as soon as the encoding is known.
    EncodingOnly,
}

/// Ceiling division onto a subsampled grid.
///
/// Rounds towards positive infinity for negative values too, so an origin
/// left of the source lands on the first grid column that still covers it.
pub fn ceil_div(value: i32, step: u32) -> i32 {
    if step <= 1 {
        return value;
    }
    let step = i64::from(step);
    let value = i64::from(value);
    (value.div_euclid(step) + i64::from(value.rem_euclid(step) != 0)) as i32
}

/// Rescale an extent; non-positive extents (the full-extent sentinel or an
/// empty region) pass through untouched.
fn scale_extent(extent: i32, step: u32) -> i32 {
    if extent <= 0 {
        return extent;
    }
    ceil_div(extent, step)
}

/// Resolve the region that the sink will fill.
///
/// Subsampling only applies to full-pixel fetches. Extents are rescaled only
/// when positive, so the full-extent sentinel survives until the (already
/// subsampled) source announces its dimensions.
pub fn resolve_region(region: Region, subsampling: Subsampling, mode: FetchMode) -> Region {
    if mode == FetchMode::EncodingOnly || !subsampling.is_active() {
        return region;
    }

    let (xs, ys) = (subsampling.x_step(), subsampling.y_step());
    Region {
        x: ceil_div(region.x, xs),
        y: ceil_div(region.y, ys),
        width: scale_extent(region.width, xs),
        height: scale_extent(region.height, ys),
    }
}
