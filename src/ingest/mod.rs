//! Frame ingestion.
//!
//! This module provides capture devices and the capture unit that polls them:
//! - Synthetic device (`stub://name`) for tests and dry runs
//! - USB/V4L2 cameras by index or device path (feature: ingest-v4l2)
//!
//! Devices are opened once, read on every capture tick, and released when the
//! capture unit stops. A failed read is a skipped tick, never a fatal error.

mod capture;
mod convert;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

pub use capture::{CaptureSettings, CaptureStats, CaptureUnit, FrameSink};
pub use convert::{to_rgb, PixelFormat};
pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Default number of device indices probed when listing cameras.
pub const DEFAULT_PROBE_MAX: u32 = 2;

/// A camera that yields frames on demand.
///
/// Implementations are owned by a single capture thread.
pub trait FrameDevice: Send {
    /// Human-readable device identifier (for logs).
    fn describe(&self) -> String;

    /// Acquire the device handle.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame. Errors are transient: the caller skips the tick.
    fn read(&mut self) -> Result<crate::frame::Frame>;

    /// Release the device handle. Must be safe to call on an unopened device.
    fn release(&mut self);
}

/// Build a device from a spec string.
///
/// - `stub://name` → synthetic frames
/// - `0`, `1`, ... → `/dev/videoN` (feature: ingest-v4l2)
/// - `/dev/...` → that V4L2 node (feature: ingest-v4l2)
pub fn open_device(spec: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameDevice>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(anyhow!("camera device must not be empty"));
    }
    if let Some(name) = spec.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticDevice::new(
            name,
            settings.width,
            settings.height,
        )));
    }
    if spec.contains("://") {
        return Err(anyhow!(
            "camera device '{}' is not a local device (no URL schemes)",
            spec
        ));
    }
    open_local_device(spec, settings)
}

#[cfg(feature = "ingest-v4l2")]
fn open_local_device(spec: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameDevice>> {
    let path = match spec.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => spec.to_string(),
    };
    Ok(Box::new(V4l2Device::new(
        &path,
        settings.width,
        settings.height,
        settings.target_fps,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_local_device(spec: &str, _settings: &CaptureSettings) -> Result<Box<dyn FrameDevice>> {
    Err(anyhow!(
        "camera device '{}' requires the ingest-v4l2 feature",
        spec
    ))
}

/// Indices in `0..max` whose device opens successfully.
pub fn probe_devices(max: u32, settings: &CaptureSettings) -> Vec<u32> {
    let mut available = Vec::new();
    for index in 0..max {
        let Ok(mut device) = open_device(&index.to_string(), settings) else {
            continue;
        };
        match device.open() {
            Ok(()) => {
                device.release();
                available.push(index);
            }
            Err(err) => log::debug!("camera {} unavailable: {}", index, err),
        }
    }
    available
}
