//! Image decoder built on the `image` crate.

use image::imageops::FilterType;
use image::{DynamicImage, ImageError};

use crate::bitmap::{PixelBuffer, PixelFormat};
use crate::key::TargetSize;
use crate::pipeline::{DecodeError, DecodeTarget, Decoder};

/// Decodes any format the `image` crate was built with.
///
/// Images larger than the target are downscaled to fit inside it,
/// preserving aspect ratio; smaller images are never upscaled. A target
/// with one zero side constrains only the other side.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder {
    filter: Option<FilterType>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resampling filter used when downscaling (default: triangle).
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl Decoder for ImageDecoder {
    fn decode(
        &self,
        data: &[u8],
        target: &DecodeTarget,
        reuse: Option<PixelBuffer>,
    ) -> Result<PixelBuffer, DecodeError> {
        let image = match image::load_from_memory(data) {
            Ok(image) => image,
            Err(e) => return Err(map_image_error(e).with_buffer(reuse)),
        };
        let image = fit(
            image,
            target.size,
            self.filter.unwrap_or(FilterType::Triangle),
        );
        let (width, height) = (image.width(), image.height());

        match reuse {
            Some(mut buffer) => {
                if !buffer.reconfigure(width, height, target.format) {
                    let message = format!(
                        "{}x{} {} does not fit buffer of {} bytes",
                        width,
                        height,
                        target.format.tag(),
                        buffer.capacity()
                    );
                    return Err(DecodeError::incompatible_buffer(message).with_buffer(Some(buffer)));
                }
                write_pixels(&image, target.format, buffer.pixels_mut());
                Ok(buffer)
            }
            None => {
                let mut buffer = PixelBuffer::allocate(width, height, target.format);
                write_pixels(&image, target.format, buffer.pixels_mut());
                Ok(buffer)
            }
        }
    }
}

/// Downscale `image` to fit inside `size`.
fn fit(image: DynamicImage, size: TargetSize, filter: FilterType) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return image;
    }

    let (max_width, max_height) = match (size.width, size.height) {
        (0, 0) => return image,
        (w, 0) => (w, u32::MAX),
        (0, h) => (u32::MAX, h),
        (w, h) => (w, h),
    };
    if width <= max_width && height <= max_height {
        return image;
    }
    image.resize(max_width, max_height, filter)
}

/// Convert into `format`, writing exactly `out.len()` bytes.
fn write_pixels(image: &DynamicImage, format: PixelFormat, out: &mut [u8]) {
    match format {
        PixelFormat::Rgba8888 => {
            out.copy_from_slice(image.to_rgba8().as_raw());
        }
        PixelFormat::Alpha8 => {
            let rgba = image.to_rgba8();
            for (dst, pixel) in out.iter_mut().zip(rgba.pixels()) {
                *dst = pixel[3];
            }
        }
        PixelFormat::Rgb565 => {
            let rgb = image.to_rgb8();
            for (dst, pixel) in out.chunks_exact_mut(2).zip(rgb.pixels()) {
                let [r, g, b] = pixel.0;
                let packed = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                dst.copy_from_slice(&packed.to_le_bytes());
            }
        }
    }
}

fn map_image_error(e: ImageError) -> DecodeError {
    match e {
        ImageError::Unsupported(e) => DecodeError::unsupported(e.to_string()),
        ImageError::Limits(e) => DecodeError::out_of_memory(e.to_string()),
        other => DecodeError::corrupt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DecodeErrorKind;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn target(width: u32, height: u32, format: PixelFormat) -> DecodeTarget {
        DecodeTarget::new(TargetSize::new(width, height), format)
    }

    #[test]
    fn test_decode_natural_size() {
        let data = png(4, 3, [255, 0, 0, 255]);
        let buffer = ImageDecoder::new()
            .decode(&data, &target(0, 0, PixelFormat::Rgba8888), None)
            .unwrap();

        assert_eq!((buffer.width(), buffer.height()), (4, 3));
        assert_eq!(&buffer.pixels()[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_downscales_to_fit_preserving_aspect() {
        let data = png(40, 20, [0, 0, 0, 255]);
        let buffer = ImageDecoder::new()
            .decode(&data, &target(10, 10, PixelFormat::Rgba8888), None)
            .unwrap();

        assert_eq!((buffer.width(), buffer.height()), (10, 5));
    }

    #[test]
    fn test_never_upscales() {
        let data = png(4, 4, [0, 0, 0, 255]);
        let buffer = ImageDecoder::new()
            .decode(&data, &target(64, 64, PixelFormat::Rgba8888), None)
            .unwrap();

        assert_eq!((buffer.width(), buffer.height()), (4, 4));
    }

    #[test]
    fn test_writes_into_reused_buffer() {
        let data = png(4, 4, [1, 2, 3, 4]);
        let reuse = PixelBuffer::allocate(8, 8, PixelFormat::Rgba8888);

        let buffer = ImageDecoder::new()
            .decode(&data, &target(8, 8, PixelFormat::Rgba8888), Some(reuse))
            .unwrap();

        assert_eq!(buffer.capacity(), 8 * 8 * 4);
        assert_eq!((buffer.width(), buffer.height()), (4, 4));
        assert_eq!(&buffer.pixels()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_small_buffer_is_incompatible_and_returned() {
        let data = png(8, 8, [0, 0, 0, 255]);
        let reuse = PixelBuffer::allocate(2, 2, PixelFormat::Rgba8888);

        let mut error = ImageDecoder::new()
            .decode(&data, &target(8, 8, PixelFormat::Rgba8888), Some(reuse))
            .unwrap_err();

        assert_eq!(error.kind, DecodeErrorKind::IncompatibleBuffer);
        assert_eq!(error.take_buffer().unwrap().capacity(), 16);
    }

    #[test]
    fn test_corrupt_bytes() {
        let error = ImageDecoder::new()
            .decode(b"not an image", &target(0, 0, PixelFormat::Rgba8888), None)
            .unwrap_err();

        assert!(matches!(
            error.kind,
            DecodeErrorKind::Corrupt | DecodeErrorKind::Unsupported
        ));
    }

    #[test]
    fn test_rgb565_and_alpha8() {
        let data = png(1, 1, [255, 255, 255, 128]);

        let buffer = ImageDecoder::new()
            .decode(&data, &target(0, 0, PixelFormat::Rgb565), None)
            .unwrap();
        assert_eq!(buffer.pixels(), &[0xFF, 0xFF]);

        let buffer = ImageDecoder::new()
            .decode(&data, &target(0, 0, PixelFormat::Alpha8), None)
            .unwrap();
        assert_eq!(buffer.pixels(), &[128]);
    }
}
