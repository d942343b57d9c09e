//! V4L2 camera device.
//!
//! Opens a local video node (e.g. `/dev/video0`), negotiates a capture format,
//! and converts each buffer to an RGB `Frame`. Preference order for the pixel
//! format is RGB3, then whatever the driver settles on if it is YUYV or MJPG.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::convert::{to_rgb, PixelFormat};
use super::FrameDevice;
use crate::frame::{Frame, RGB_CHANNELS};

pub struct V4l2Device {
    path: String,
    width: u32,
    height: u32,
    target_fps: u32,
    format: PixelFormat,
    state: Option<V4l2State>,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(path: &str, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            path: path.to_string(),
            width,
            height,
            target_fps,
            format: PixelFormat::Rgb24,
            state: None,
        }
    }
}

impl FrameDevice for V4l2Device {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} delivers unsupported pixel format {}",
                self.path,
                format.fourcc
            )
        })?;

        let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Device: failed to set fps on {}: {}", self.path, err);
        }

        self.width = format.width;
        self.height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Device: opened {} ({}x{}, {:?})",
            self.path,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let (width, height, format) = (self.width, self.height, self.format);
        let rgb = state.with_stream_mut(|stream| -> Result<Vec<u8>> {
            let (buf, meta) = stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            to_rgb(&buf[..used], width, height, format)
        })?;
        Frame::new(rgb, width, height, RGB_CHANNELS)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Device: released {}", self.path);
        }
    }
}
