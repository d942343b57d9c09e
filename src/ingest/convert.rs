use anyhow::{anyhow, Context, Result};

/// Pixel layouts a camera may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
    /// Motion JPEG, one complete JPEG per buffer.
    Mjpeg,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a captured buffer to packed RGB of the given dimensions.
pub fn to_rgb(buf: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Vec<u8>> {
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            if buf.len() < pixels * 3 {
                return Err(anyhow!(
                    "RGB buffer too short: {} bytes for {}x{}",
                    buf.len(),
                    width,
                    height
                ));
            }
            Ok(buf[..pixels * 3].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(buf, pixels),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .context("decode MJPG frame")?
                .to_rgb8();
            if decoded.dimensions() != (width, height) {
                return Err(anyhow!(
                    "MJPG frame is {}x{}, expected {}x{}",
                    decoded.width(),
                    decoded.height(),
                    width,
                    height
                ));
            }
            Ok(decoded.into_raw())
        }
    }
}

fn yuyv_to_rgb(buf: &[u8], pixels: usize) -> Result<Vec<u8>> {
    if pixels % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even pixel count"));
    }
    if buf.len() < pixels * 2 {
        return Err(anyhow!(
            "YUYV buffer too short: {} bytes for {} pixels",
            buf.len(),
            pixels
        ));
    }
    let mut rgb = Vec::with_capacity(pixels * 3);
    for pair in buf[..pixels * 2].chunks_exact(4) {
        let u = pair[1] as f32 - 128.0;
        let v = pair[3] as f32 - 128.0;
        for y in [pair[0], pair[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402 * v));
            rgb.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_to_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let yuyv = [100u8, 128, 200, 128];
        let rgb = to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_trims_padding() -> Result<()> {
        let buf = vec![5u8; 3 * 4 + 8];
        assert_eq!(to_rgb(&buf, 2, 2, PixelFormat::Rgb24)?, vec![5u8; 12]);
        assert!(to_rgb(&buf[..11], 2, 2, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn mjpeg_round_trips_dimensions() -> Result<()> {
        let image = image::RgbImage::from_pixel(8, 4, image::Rgb([40, 80, 120]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)?;
        let rgb = to_rgb(&jpeg, 8, 4, PixelFormat::Mjpeg)?;
        assert_eq!(rgb.len(), 8 * 4 * 3);
        assert!(to_rgb(&jpeg, 4, 4, PixelFormat::Mjpeg).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), None);
    }
}
