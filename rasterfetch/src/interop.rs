//! Conversions between `image` crate buffers and this crate's types.
//!
//! [`source_from_dynamic_image`] wraps a decoded image as a [`MemorySource`],
//! and [`MaterializedImage::to_dynamic_image`] turns a fetch result back into
//! something the `image` crate can encode.

use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};

use crate::buffer::SampleData;
use crate::encoding::{ChannelLayout, Encoding, PackedMasks};
use crate::error::FactoryResult;
use crate::factory::MaterializedImage;
use crate::source::MemorySource;

/// Wrap a decoded image as a tiled in-memory producer.
///
/// 8-bit gray, 16-bit gray and 8-bit RGB keep their precision; every other
/// color type is delivered as 8-bit ARGB.
pub fn source_from_dynamic_image(image: &DynamicImage) -> FactoryResult<MemorySource> {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(gray) => {
            MemorySource::new(width, height, Encoding::gray8(), SampleData::Bytes(gray.as_raw().clone()))
        }
        DynamicImage::ImageLuma16(gray) => {
            MemorySource::new(width, height, Encoding::gray16(), SampleData::Shorts(gray.as_raw().clone()))
        }
        DynamicImage::ImageRgb8(rgb) => {
            let samples = rgb
                .pixels()
                .map(|Rgb([r, g, b])| u32::from_be_bytes([0, *r, *g, *b]))
                .collect();
            MemorySource::new(width, height, Encoding::rgb(), SampleData::Ints(samples))
        }
        other => {
            let samples = other
                .to_rgba8()
                .pixels()
                .map(|Rgba([r, g, b, a])| u32::from_be_bytes([*a, *r, *g, *b]))
                .collect();
            MemorySource::new(width, height, Encoding::argb(), SampleData::Ints(samples))
        }
    }
}

/// Extract the channel selected by `mask` and scale it to `target_bits`.
fn channel(sample: u32, mask: u32, target_bits: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    let bits = mask.count_ones();
    let value = u64::from((sample & mask) >> mask.trailing_zeros());
    let max = (1u64 << bits) - 1;
    let target_max = (1u64 << target_bits) - 1;
    ((value * target_max + max / 2) / max) as u32
}

fn unpremultiply(color: u8, alpha: u8) -> u8 {
    if alpha == 0 {
        0
    } else {
        ((u32::from(color) * 255 + u32::from(alpha) / 2) / u32::from(alpha)).min(255) as u8
    }
}

fn packed_to_rgba(sample: u32, masks: &PackedMasks, premultiplied: bool) -> [u8; 4] {
    let alpha = if masks.alpha == 0 {
        255
    } else {
        channel(sample, masks.alpha, 8) as u8
    };
    let mut rgb = [
        channel(sample, masks.red, 8) as u8,
        channel(sample, masks.green, 8) as u8,
        channel(sample, masks.blue, 8) as u8,
    ];
    if premultiplied && masks.alpha != 0 {
        for c in &mut rgb {
            *c = unpremultiply(*c, alpha);
        }
    }
    [rgb[0], rgb[1], rgb[2], alpha]
}

impl MaterializedImage {
    /// Convert to an `image` crate buffer.
    ///
    /// Gray layouts become `Luma8` (up to 8 bits) or `Luma16`; packed and
    /// indexed layouts become `Rgba8` when they carry alpha and `Rgb8`
    /// otherwise. Premultiplied colors are divided back out.
    pub fn to_dynamic_image(&self) -> DynamicImage {
        let (width, height) = (self.width(), self.height());
        let sample = |x: u32, y: u32| self.sample(x, y).unwrap_or(0);
        let encoding = self.encoding();

        match encoding.layout() {
            ChannelLayout::Gray { bits } if *bits <= 8 => {
                let mask = (1u32 << bits) - 1;
                DynamicImage::ImageLuma8(ImageBuffer::from_fn(width, height, |x, y| {
                    Luma([channel(sample(x, y), mask, 8) as u8])
                }))
            }
            ChannelLayout::Gray { bits } => {
                let mask = u32::MAX >> (32 - u32::from(*bits));
                DynamicImage::ImageLuma16(ImageBuffer::from_fn(width, height, |x, y| {
                    Luma([channel(sample(x, y), mask, 16) as u16])
                }))
            }
            ChannelLayout::Packed(masks) => {
                let premultiplied = encoding.is_premultiplied();
                if masks.alpha != 0 {
                    DynamicImage::ImageRgba8(ImageBuffer::from_fn(width, height, |x, y| {
                        Rgba(packed_to_rgba(sample(x, y), masks, premultiplied))
                    }))
                } else {
                    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
                        let [r, g, b, _] = packed_to_rgba(sample(x, y), masks, false);
                        Rgb([r, g, b])
                    }))
                }
            }
            ChannelLayout::Indexed { palette } => {
                let lookup = |x: u32, y: u32| {
                    let entry = palette.get(sample(x, y) as usize).copied().unwrap_or(0);
                    entry.to_be_bytes()
                };
                if encoding.has_alpha() {
                    DynamicImage::ImageRgba8(ImageBuffer::from_fn(width, height, |x, y| {
                        let [a, r, g, b] = lookup(x, y);
                        Rgba([r, g, b, a])
                    }))
                } else {
                    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
                        let [_, r, g, b] = lookup(x, y);
                        Rgb([r, g, b])
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::encoding::SampleKind;
    use crate::source::Properties;

    fn image_from(encoding: Encoding, width: u32, height: u32, data: SampleData) -> MaterializedImage {
        let mut buffer = PixelBuffer::allocate(data.kind(), width, height);
        buffer.write_block(0, 0, width, height, &data, 0, width as usize).unwrap();
        MaterializedImage::new(buffer, encoding, Properties::new())
    }

    #[test]
    fn test_channel_scaling() {
        assert_eq!(channel(0xf800, 0xf800, 8), 255);
        assert_eq!(channel(0x0000, 0xf800, 8), 0);
        assert_eq!(channel(0x07e0, 0x07e0, 8), 255);
        assert_eq!(channel(0x00ab_0000, 0x00ff_0000, 8), 0xab);
        assert_eq!(channel(0xff, 0xff, 16), 0xffff);
        assert_eq!(channel(1, 0, 8), 0);
    }

    #[test]
    fn test_unpremultiply() {
        assert_eq!(unpremultiply(64, 128), 128);
        assert_eq!(unpremultiply(10, 0), 0);
        assert_eq!(unpremultiply(255, 255), 255);
    }

    #[test]
    fn test_rgba_source_packs_argb() {
        let rgba = ImageBuffer::from_raw(1, 1, vec![0x11, 0x22, 0x33, 0x44]).unwrap();
        let source = source_from_dynamic_image(&DynamicImage::ImageRgba8(rgba)).unwrap();
        assert_eq!(source.encoding(), &Encoding::argb());
    }

    #[test]
    fn test_luma16_keeps_precision() {
        let gray: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(2, 1, vec![0x1234, 0xfedc]).unwrap();
        let source = source_from_dynamic_image(&DynamicImage::ImageLuma16(gray)).unwrap();
        assert_eq!(source.encoding(), &Encoding::gray16());
    }

    #[test]
    fn test_rgb565_to_rgb8() {
        let image = image_from(Encoding::rgb565(), 2, 1, SampleData::Shorts(vec![0xf800, 0x001f]));
        let rgb = image.to_dynamic_image().to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_premultiplied_argb_is_divided_out() {
        let encoding = Encoding::argb().with_premultiplied_alpha(true);
        let image = image_from(encoding, 1, 1, SampleData::Ints(vec![0x8040_4040]));
        match image.to_dynamic_image() {
            DynamicImage::ImageRgba8(rgba) => assert_eq!(rgba.get_pixel(0, 0), &Rgba([128, 128, 128, 128])),
            other => panic!("expected rgba8, got {:?}", other.color()),
        }
    }

    #[test]
    fn test_indexed_palette_lookup() {
        let encoding = Encoding::indexed(vec![0xff00_0000, 0xffff_ffff]).unwrap();
        let image = image_from(encoding, 2, 1, SampleData::Bytes(vec![1, 0]));
        match image.to_dynamic_image() {
            DynamicImage::ImageRgb8(rgb) => {
                assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
                assert_eq!(rgb.get_pixel(1, 0), &Rgb([0, 0, 0]));
            }
            other => panic!("expected rgb8, got {:?}", other.color()),
        }
    }

    #[test]
    fn test_gray16_to_luma16() {
        let image = image_from(Encoding::gray16(), 1, 1, SampleData::Shorts(vec![0x1234]));
        assert_eq!(image.to_dynamic_image().as_luma16().map(|g| g.get_pixel(0, 0)[0]), Some(0x1234));
        assert_eq!(image.buffer().kind(), SampleKind::Short);
    }
}
