//! Immutable frame buffers.
//!
//! A `Frame` is produced once by a capture device and never mutated afterwards.
//! Pixel data sits behind an `Arc<[u8]>`, so handing a frame from the capture
//! thread to the inference queue moves a pointer, not the image.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// RGB, one byte per channel.
pub const RGB_CHANNELS: u8 = 3;

#[derive(Clone, Debug)]
pub struct Frame {
    /// Private pixel data in row-major RGB order. There is no mutable accessor.
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    channels: u8,
    captured_at: SystemTime,
}

impl Frame {
    /// Wrap a freshly captured buffer. The buffer length must match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(anyhow!(
                "frame dimensions must be non-zero ({}x{}x{})",
                width,
                height,
                channels
            ));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, expected {} for {}x{}x{}",
                pixels.len(),
                expected,
                width,
                height,
                channels
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            channels,
            captured_at: SystemTime::now(),
        })
    }

    pub fn from_rgb_image(image: image::RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, RGB_CHANNELS)
    }

    /// Decode a still image from disk into an RGB frame.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        Self::from_rgb_image(image.to_rgb8())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 11], 2, 2, 3).is_err());
        assert!(Frame::new(vec![], 0, 2, 3).is_err());
    }

    #[test]
    fn frame_clone_shares_pixels() -> Result<()> {
        let frame = Frame::new(vec![7u8; 2 * 3 * 3], 2, 3, RGB_CHANNELS)?;
        let copy = frame.clone();
        assert_eq!(copy.pixels().as_ptr(), frame.pixels().as_ptr());
        assert_eq!(copy.width(), 2);
        assert_eq!(copy.height(), 3);
        assert_eq!(copy.byte_len(), 18);
        Ok(())
    }

    #[test]
    fn frame_from_rgb_image_keeps_dimensions() -> Result<()> {
        let image = image::RgbImage::from_pixel(4, 2, image::Rgb([1, 2, 3]));
        let frame = Frame::from_rgb_image(image)?;
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(&frame.pixels()[..3], &[1, 2, 3]);
        Ok(())
    }
}
