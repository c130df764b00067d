use crate::buffer::PixelBuffer;
use crate::encoding::Encoding;
use crate::source::Properties;

/// A fully assembled image.
///
/// Produced by [`ImageFactory::get_image`](super::ImageFactory::get_image) and
/// shared as `Arc<MaterializedImage>` between the factory's cache and callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedImage {
    buffer: PixelBuffer,
    encoding: Encoding,
    properties: Properties,
}

impl MaterializedImage {
    pub(crate) fn new(buffer: PixelBuffer, encoding: Encoding, properties: Properties) -> Self {
        Self {
            buffer,
            encoding,
            properties,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Look up one property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Raw sample at `(x, y)`, widened to `u32`.
    pub fn sample(&self, x: u32, y: u32) -> Option<u32> {
        self.buffer.sample(x, y)
    }
}
