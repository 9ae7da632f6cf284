//! Decoded image buffers and handles.
//!
//! A [`PixelBuffer`] is the raw decode target. It is owned by exactly one
//! party at a time: the [`BufferPool`](crate::pool::BufferPool) free list, a
//! decode in progress, or a [`DecodedImage`]. When the last [`ImageHandle`]
//! to a decoded image is dropped, its buffer is handed back to the pool it
//! was borrowed from.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use crate::pool::BufferPool;

/// Pixel layouts a decoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    /// 32-bit RGBA, 8 bits per channel
    Rgba8888,
    /// 16-bit packed RGB
    Rgb565,
    /// 8-bit alpha mask
    Alpha8,
}

impl PixelFormat {
    /// Bytes used by one pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Rgb565 => 2,
            Self::Alpha8 => 1,
        }
    }

    /// Short stable tag used inside cache keys.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Rgba8888 => "rgba8888",
            Self::Rgb565 => "rgb565",
            Self::Alpha8 => "alpha8",
        }
    }

    /// Bytes needed to hold an image of the given dimensions.
    pub fn bytes_for(self, width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(self.bytes_per_pixel())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rgba8888" | "rgba" => Ok(Self::Rgba8888),
            "rgb565" => Ok(Self::Rgb565),
            "alpha8" | "alpha" => Ok(Self::Alpha8),
            other => Err(format!("unknown pixel format '{}'", other)),
        }
    }
}

/// Raw decode target.
///
/// The backing allocation (`capacity()`) may be larger than the pixels
/// currently described by `width × height × format`; pooled buffers are
/// reused for smaller images without reallocating.
pub struct PixelBuffer {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer sized exactly for the given image.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            bytes: vec![0u8; format.bytes_for(width, height)],
            width,
            height,
            format,
        }
    }

    /// Wrap existing pixel bytes.
    ///
    /// `bytes` must hold at least `width × height × bpp` bytes; any extra is
    /// treated as spare capacity.
    pub fn from_bytes(
        bytes: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<Self> {
        if bytes.len() < format.bytes_for(width, height) {
            return None;
        }
        Some(Self {
            bytes,
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Size of the backing allocation in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes described by the current dimensions.
    pub fn used_bytes(&self) -> usize {
        self.format.bytes_for(self.width, self.height)
    }

    /// Returns true if this buffer can hold an image of the given shape.
    pub fn fits(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.capacity() >= format.bytes_for(width, height)
    }

    /// Re-describe the buffer for a new image without reallocating.
    ///
    /// Returns false (and leaves the buffer unchanged) if the backing
    /// allocation is too small.
    pub fn reconfigure(&mut self, width: u32, height: u32, format: PixelFormat) -> bool {
        if !self.fits(width, height, format) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.format = format;
        true
    }

    /// Pixel bytes for the current dimensions.
    pub fn pixels(&self) -> &[u8] {
        &self.bytes[..self.used_bytes()]
    }

    /// Mutable pixel bytes for the current dimensions.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        let used = self.used_bytes();
        &mut self.bytes[..used]
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Shared handle to a decoded image.
///
/// Cloning is a retain; dropping is a release. The memory cache holds one
/// handle while the image is resident, displayers hold the others.
pub type ImageHandle = Arc<DecodedImage>;

/// A decoded image ready for display.
pub struct DecodedImage {
    buffer: Option<PixelBuffer>,
    recycler: Option<Weak<BufferPool>>,
}

impl DecodedImage {
    /// Wrap a buffer that is not tied to any pool.
    pub fn new(buffer: PixelBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            recycler: None,
        }
    }

    /// Wrap a buffer that returns to `pool` once the image is released.
    pub fn pooled(buffer: PixelBuffer, pool: &Arc<BufferPool>) -> Self {
        Self {
            buffer: Some(buffer),
            recycler: Some(Arc::downgrade(pool)),
        }
    }

    /// Convenience: wrap into a shared handle.
    pub fn into_handle(self) -> ImageHandle {
        Arc::new(self)
    }

    pub fn width(&self) -> u32 {
        self.buffer.as_ref().map_or(0, PixelBuffer::width)
    }

    pub fn height(&self) -> u32 {
        self.buffer.as_ref().map_or(0, PixelBuffer::height)
    }

    pub fn format(&self) -> PixelFormat {
        self.buffer
            .as_ref()
            .map_or(PixelFormat::Rgba8888, PixelBuffer::format)
    }

    pub fn pixels(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => buffer.pixels(),
            None => &[],
        }
    }

    /// Memory footprint used for cache accounting.
    ///
    /// Pure function of the pixel shape; never zero.
    pub fn byte_size(&self) -> usize {
        self.format()
            .bytes_for(self.width(), self.height())
            .max(1)
    }
}

impl Drop for DecodedImage {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        if let Some(pool) = self.recycler.as_ref().and_then(Weak::upgrade) {
            pool.put(buffer);
        }
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("pooled", &self.recycler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_for_formats() {
        assert_eq!(PixelFormat::Rgba8888.bytes_for(10, 10), 400);
        assert_eq!(PixelFormat::Rgb565.bytes_for(10, 10), 200);
        assert_eq!(PixelFormat::Alpha8.bytes_for(10, 10), 100);
    }

    #[test]
    fn test_reconfigure_respects_capacity() {
        let mut buffer = PixelBuffer::allocate(10, 10, PixelFormat::Rgba8888);
        assert!(buffer.reconfigure(20, 10, PixelFormat::Rgb565));
        assert_eq!(buffer.used_bytes(), 400);
        assert!(!buffer.reconfigure(11, 10, PixelFormat::Rgba8888));
        assert_eq!(buffer.width(), 20);
    }

    #[test]
    fn test_byte_size_never_zero() {
        let image = DecodedImage::new(PixelBuffer::allocate(0, 0, PixelFormat::Alpha8));
        assert_eq!(image.byte_size(), 1);
    }

    #[test]
    fn test_from_bytes_rejects_short_buffer() {
        assert!(PixelBuffer::from_bytes(vec![0; 3], 1, 1, PixelFormat::Rgba8888).is_none());
        assert!(PixelBuffer::from_bytes(vec![0; 8], 1, 1, PixelFormat::Rgba8888).is_some());
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("RGBA".parse::<PixelFormat>(), Ok(PixelFormat::Rgba8888));
        assert_eq!("rgb565".parse::<PixelFormat>(), Ok(PixelFormat::Rgb565));
        assert!("bc1".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_released_image_returns_buffer_to_pool() {
        let pool = Arc::new(BufferPool::new(1_000_000, true));
        let image = DecodedImage::pooled(
            PixelBuffer::allocate(10, 10, PixelFormat::Rgba8888),
            &pool,
        )
        .into_handle();
        let displayed = Arc::clone(&image);

        drop(image);
        assert_eq!(pool.len(), 0, "still displayed, not yet recycled");

        drop(displayed);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.size_bytes(), 400);
    }
}
