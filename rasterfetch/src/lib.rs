//! rasterfetch - streaming image materialization
//!
//! This library turns push-based, tile-at-a-time image producers into fully
//! assembled in-memory images. An [`ImageFactory`] drives one producer,
//! optionally restricted to a region of interest and subsampled, and blocks
//! the caller until the producer signals completion.
//!
//! # Modules
//!
//! - [`factory`]: the controller, its configuration and the assembled image
//! - [`source`]: the producer protocol and reference producers
//! - [`geometry`]: regions, subsampling and region resolution
//! - [`encoding`]: sample kinds and channel layouts
//! - [`buffer`]: typed sample storage
//! - [`progress`]: progress listeners
//! - [`interop`]: conversions to and from the `image` crate

pub mod buffer;
pub mod encoding;
pub mod error;
pub mod factory;
pub mod geometry;
pub mod interop;
pub mod progress;
mod sink;
pub mod source;

pub use buffer::{PixelBuffer, SampleData};
pub use encoding::{ChannelLayout, Encoding, PackedMasks, SampleKind};
pub use error::{ConversionError, FactoryError, FactoryResult};
pub use factory::{FactoryConfig, FactoryId, ImageFactory, MaterializedImage};
pub use geometry::{Region, Subsampling};
pub use progress::{ListenerId, ProgressListener};
pub use source::{
    CompletionStatus, ImageProducer, MemorySource, PixelSender, SubsamplingSource, ThreadedSource, Tile,
    TileOrder,
};
