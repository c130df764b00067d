//! Typed pixel storage.
//!
//! [`SampleData`] is the tagged union over the three element kinds a source may
//! deliver. [`PixelBuffer`] owns one of them, laid out row-major with a stride
//! and offset, and is the only thing tile data is ever copied into.

use thiserror::Error;

use crate::encoding::SampleKind;

/// Errors raised while copying samples.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Source and destination hold different element kinds.
    #[error("cannot copy {found} samples into a {expected} buffer")]
    KindMismatch {
        expected: SampleKind,
        found: SampleKind,
    },

    /// The copy would read or write past the end of a slice.
    #[error("{side} range ends at {end} but only {len} samples exist")]
    OutOfBounds {
        side: &'static str,
        end: usize,
        len: usize,
    },

    /// Rows overlap because the stride is narrower than the copied width.
    #[error("stride {stride} is smaller than row width {width}")]
    StrideTooSmall { stride: usize, width: usize },
}

/// Samples of one element kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleData {
    Bytes(Vec<u8>),
    Shorts(Vec<u16>),
    Ints(Vec<u32>),
}

impl SampleData {
    /// Allocate `len` zeroed samples of `kind`.
    pub fn zeroed(kind: SampleKind, len: usize) -> Self {
        match kind {
            SampleKind::Byte => SampleData::Bytes(vec![0; len]),
            SampleKind::Short => SampleData::Shorts(vec![0; len]),
            SampleKind::Int => SampleData::Ints(vec![0; len]),
        }
    }

    /// Element kind of these samples.
    pub fn kind(&self) -> SampleKind {
        match self {
            SampleData::Bytes(_) => SampleKind::Byte,
            SampleData::Shorts(_) => SampleKind::Short,
            SampleData::Ints(_) => SampleKind::Int,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Bytes(v) => v.len(),
            SampleData::Shorts(v) => v.len(),
            SampleData::Ints(v) => v.len(),
        }
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one sample widened to `u32`.
    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            SampleData::Bytes(v) => v.get(index).map(|&s| u32::from(s)),
            SampleData::Shorts(v) => v.get(index).map(|&s| u32::from(s)),
            SampleData::Ints(v) => v.get(index).copied(),
        }
    }

    /// Narrow 32-bit samples to their low 16 bits.
    ///
    /// Byte and short samples are returned unchanged.
    pub fn narrow_to_shorts(self) -> Self {
        match self {
            SampleData::Ints(v) => SampleData::Shorts(v.into_iter().map(|s| (s & 0xffff) as u16).collect()),
            other => other,
        }
    }

    /// Collect the samples at `indices`, in order.
    ///
    /// Returns `None` if any index is out of range.
    pub fn gather(&self, indices: &[usize]) -> Option<SampleData> {
        fn pick<T: Copy>(src: &[T], indices: &[usize]) -> Option<Vec<T>> {
            indices.iter().map(|&i| src.get(i).copied()).collect()
        }

        Some(match self {
            SampleData::Bytes(v) => SampleData::Bytes(pick(v, indices)?),
            SampleData::Shorts(v) => SampleData::Shorts(pick(v, indices)?),
            SampleData::Ints(v) => SampleData::Ints(pick(v, indices)?),
        })
    }

    /// Copy a `cols`×`rows` block from `src` into `self`.
    ///
    /// Bounds are checked for the whole block before anything is written, so a
    /// failed copy leaves the destination untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_block(
        &mut self,
        dst_offset: usize,
        dst_stride: usize,
        src: &SampleData,
        src_offset: usize,
        src_stride: usize,
        cols: usize,
        rows: usize,
    ) -> Result<(), BufferError> {
        let dst = Span::new(dst_offset, dst_stride, cols, rows);
        let src_span = Span::new(src_offset, src_stride, cols, rows);

        match (self, src) {
            (SampleData::Bytes(d), SampleData::Bytes(s)) => copy_rows(d, dst, s, src_span),
            (SampleData::Shorts(d), SampleData::Shorts(s)) => copy_rows(d, dst, s, src_span),
            (SampleData::Ints(d), SampleData::Ints(s)) => copy_rows(d, dst, s, src_span),
            (d, s) => Err(BufferError::KindMismatch {
                expected: d.kind(),
                found: s.kind(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    stride: usize,
    cols: usize,
    rows: usize,
}

impl Span {
    fn new(offset: usize, stride: usize, cols: usize, rows: usize) -> Self {
        Self {
            offset,
            stride,
            cols,
            rows,
        }
    }

    /// One past the last index touched.
    fn end(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            return self.offset;
        }
        self.offset
            .saturating_add((self.rows - 1).saturating_mul(self.stride))
            .saturating_add(self.cols)
    }

    fn check(&self, side: &'static str, len: usize) -> Result<(), BufferError> {
        if self.rows > 1 && self.stride < self.cols {
            return Err(BufferError::StrideTooSmall {
                stride: self.stride,
                width: self.cols,
            });
        }
        let end = self.end();
        if end > len {
            return Err(BufferError::OutOfBounds { side, end, len });
        }
        Ok(())
    }
}

fn copy_rows<T: Copy>(dst: &mut [T], dst_span: Span, src: &[T], src_span: Span) -> Result<(), BufferError> {
    dst_span.check("destination", dst.len())?;
    src_span.check("source", src.len())?;

    let cols = dst_span.cols;
    let mut d = dst_span.offset;
    let mut s = src_span.offset;
    for _ in 0..dst_span.rows {
        dst[d..d + cols].copy_from_slice(&src[s..s + cols]);
        d += dst_span.stride;
        s += src_span.stride;
    }
    Ok(())
}

/// Row-major pixel storage with one sample per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    offset: usize,
    data: SampleData,
}

impl PixelBuffer {
    /// Allocate a zeroed `width`×`height` buffer with `stride = width` and no offset.
    pub fn allocate(kind: SampleKind, width: u32, height: u32) -> Self {
        let stride = width as usize;
        Self {
            width,
            height,
            stride,
            offset: 0,
            data: SampleData::zeroed(kind, stride * height as usize),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Distance in samples between the starts of two rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Index of the first sample.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Element kind.
    pub fn kind(&self) -> SampleKind {
        self.data.kind()
    }

    /// Backing samples.
    pub fn data(&self) -> &SampleData {
        &self.data
    }

    /// Consume the buffer, returning its samples.
    pub fn into_data(self) -> SampleData {
        self.data
    }

    /// Sample at pixel `(x, y)`, widened to `u32`.
    pub fn sample(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(self.index(x, y))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        self.offset + y as usize * self.stride + x as usize
    }

    /// Copy a block of samples so that its first sample lands at `(x, y)`.
    #[allow(clippy::too_many_arguments)]
    pub fn write_block(
        &mut self,
        x: u32,
        y: u32,
        cols: u32,
        rows: u32,
        src: &SampleData,
        src_offset: usize,
        src_stride: usize,
    ) -> Result<(), BufferError> {
        if x + cols > self.width || y + rows > self.height {
            return Err(BufferError::OutOfBounds {
                side: "destination",
                end: self.index(x + cols, y + rows.saturating_sub(1)),
                len: self.data.len(),
            });
        }
        let dst_offset = self.index(x, y);
        let stride = self.stride;
        self.data
            .copy_block(dst_offset, stride, src, src_offset, src_stride, cols as usize, rows as usize)
    }
}
