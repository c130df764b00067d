//! Sample encodings.
//!
//! An [`Encoding`] pairs the element kind every sample is stored in with a
//! descriptor of what one sample means. One sample always describes exactly one
//! pixel: either a gray level, a packed set of channels, or a palette index.
//! Two encodings are interchangeable only if they are structurally equal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FactoryError, FactoryResult};

/// Storage width of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKind {
    /// 8-bit samples.
    Byte,
    /// 16-bit samples.
    Short,
    /// 32-bit packed samples.
    Int,
}

impl SampleKind {
    /// Number of bits in one sample.
    pub fn bits(&self) -> u32 {
        match self {
            SampleKind::Byte => 8,
            SampleKind::Short => 16,
            SampleKind::Int => 32,
        }
    }

    /// Number of bytes in one sample.
    pub fn size(&self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest value a sample of this kind can hold.
    pub fn max_value(&self) -> u32 {
        match self {
            SampleKind::Byte => u8::MAX as u32,
            SampleKind::Short => u16::MAX as u32,
            SampleKind::Int => u32::MAX,
        }
    }
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleKind::Byte => write!(f, "8-bit"),
            SampleKind::Short => write!(f, "16-bit"),
            SampleKind::Int => write!(f, "32-bit"),
        }
    }
}

/// Channel bit masks of a packed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackedMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub alpha: u32,
}

impl PackedMasks {
    fn all(&self) -> u32 {
        self.red | self.green | self.blue | self.alpha
    }

    fn overlap(&self) -> bool {
        let masks = [self.red, self.green, self.blue, self.alpha];
        masks
            .iter()
            .enumerate()
            .any(|(i, a)| masks[i + 1..].iter().any(|b| a & b != 0))
    }
}

/// What a single sample describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Gray level using the low `bits` of the sample.
    Gray { bits: u8 },
    /// Color channels packed into one sample.
    Packed(PackedMasks),
    /// Index into a palette of `0xAARRGGBB` entries.
    Indexed { palette: Arc<[u32]> },
}

/// The element kind and channel layout shared by every tile of a fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoding {
    kind: SampleKind,
    layout: ChannelLayout,
    premultiplied: bool,
}

impl Encoding {
    /// Create an encoding, checking that the layout fits the sample width.
    pub fn new(kind: SampleKind, layout: ChannelLayout) -> FactoryResult<Self> {
        match &layout {
            ChannelLayout::Gray { bits } => {
                if *bits == 0 || u32::from(*bits) > kind.bits() {
                    return Err(FactoryError::InvalidArgument(format!(
                        "{} gray bits do not fit {} samples",
                        bits, kind
                    )));
                }
            }
            ChannelLayout::Packed(masks) => {
                if masks.all() == 0 || masks.all() > kind.max_value() {
                    return Err(FactoryError::InvalidArgument(format!(
                        "packed masks {:#x} do not fit {} samples",
                        masks.all(),
                        kind
                    )));
                }
                if masks.overlap() {
                    return Err(FactoryError::InvalidArgument(
                        "packed channel masks overlap".to_string(),
                    ));
                }
            }
            ChannelLayout::Indexed { palette } => {
                if palette.is_empty() {
                    return Err(FactoryError::InvalidArgument(
                        "palette is empty".to_string(),
                    ));
                }
                if kind == SampleKind::Int {
                    return Err(FactoryError::InvalidArgument(
                        "indexed samples must be 8 or 16 bits".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            kind,
            layout,
            premultiplied: false,
        })
    }

    /// Mark the color channels as premultiplied by alpha.
    pub fn with_premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied = premultiplied;
        self
    }

    /// 32-bit `0xAARRGGBB` samples.
    pub fn argb() -> Self {
        Self::packed_unchecked(
            SampleKind::Int,
            PackedMasks {
                red: 0x00ff_0000,
                green: 0x0000_ff00,
                blue: 0x0000_00ff,
                alpha: 0xff00_0000,
            },
        )
    }

    /// 32-bit `0x00RRGGBB` samples.
    pub fn rgb() -> Self {
        Self::packed_unchecked(
            SampleKind::Int,
            PackedMasks {
                red: 0x00ff_0000,
                green: 0x0000_ff00,
                blue: 0x0000_00ff,
                alpha: 0,
            },
        )
    }

    /// 16-bit 5-6-5 packed samples.
    pub fn rgb565() -> Self {
        Self::packed_unchecked(
            SampleKind::Short,
            PackedMasks {
                red: 0xf800,
                green: 0x07e0,
                blue: 0x001f,
                alpha: 0,
            },
        )
    }

    /// 8-bit gray.
    pub fn gray8() -> Self {
        Self {
            kind: SampleKind::Byte,
            layout: ChannelLayout::Gray { bits: 8 },
            premultiplied: false,
        }
    }

    /// 16-bit gray.
    pub fn gray16() -> Self {
        Self {
            kind: SampleKind::Short,
            layout: ChannelLayout::Gray { bits: 16 },
            premultiplied: false,
        }
    }

    /// 8-bit palette indices.
    pub fn indexed(palette: impl Into<Arc<[u32]>>) -> FactoryResult<Self> {
        Self::new(
            SampleKind::Byte,
            ChannelLayout::Indexed {
                palette: palette.into(),
            },
        )
    }

    fn packed_unchecked(kind: SampleKind, masks: PackedMasks) -> Self {
        Self {
            kind,
            layout: ChannelLayout::Packed(masks),
            premultiplied: false,
        }
    }

    /// Element kind samples are transferred and stored in.
    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    /// What a sample describes.
    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Whether color channels are premultiplied by alpha.
    pub fn is_premultiplied(&self) -> bool {
        self.premultiplied
    }

    /// Whether samples carry an alpha channel.
    pub fn has_alpha(&self) -> bool {
        match &self.layout {
            ChannelLayout::Gray { .. } => false,
            ChannelLayout::Packed(masks) => masks.alpha != 0,
            ChannelLayout::Indexed { palette } => palette.iter().any(|c| c >> 24 != 0xff),
        }
    }
}
