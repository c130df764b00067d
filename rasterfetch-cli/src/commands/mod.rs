//! CLI subcommands and the argument parsers they share.

pub mod convert;
pub mod probe;

use std::path::Path;
use std::sync::Arc;

use rasterfetch::interop::source_from_dynamic_image;
use rasterfetch::{MemorySource, Region, Subsampling};
use tracing::debug;

use crate::error::CliError;

/// Tile size given as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

fn parse_numbers<T: std::str::FromStr>(s: &str, sep: char, expected: usize, what: &str) -> Result<Vec<T>, String> {
    let parts: Vec<&str> = s.split(sep).map(str::trim).collect();
    if parts.len() != expected {
        return Err(format!("{} needs {} values separated by '{}', got '{}'", what, expected, sep, s));
    }
    parts
        .iter()
        .map(|p| p.parse::<T>().map_err(|_| format!("'{}' is not a valid number in {}", p, what)))
        .collect()
}

/// Parse `X,Y,W,H`. Use `-1` for W or H to mean "to the edge of the source".
pub fn parse_region(s: &str) -> Result<Region, String> {
    let v = parse_numbers::<i32>(s, ',', 4, "region")?;
    Ok(Region::new(v[0], v[1], v[2], v[3]))
}

/// Parse `X,Y` subsampling steps.
pub fn parse_subsampling(s: &str) -> Result<Subsampling, String> {
    let v = parse_numbers::<i32>(s, ',', 2, "subsampling")?;
    Ok(Subsampling::new(v[0], v[1]))
}

/// Parse `WxH`.
pub fn parse_tile_size(s: &str) -> Result<TileSize, String> {
    let v = parse_numbers::<u32>(&s.to_lowercase(), 'x', 2, "tile size")?;
    if v[0] == 0 || v[1] == 0 {
        return Err("tile size must be positive".to_string());
    }
    Ok(TileSize {
        width: v[0],
        height: v[1],
    })
}

/// Decode `path` into a tiled in-memory source.
pub fn open_source(path: &Path, tile: TileSize) -> Result<Arc<MemorySource>, CliError> {
    let decoded = image::open(path).map_err(|source| CliError::ImageRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "Decoded input"
    );
    let source = source_from_dynamic_image(&decoded)?.with_tile_size(tile.width, tile.height);
    Ok(Arc::new(source))
}
