use anyhow::{anyhow, Result};
use rand::Rng;

use super::FrameDevice;
use crate::frame::{Frame, RGB_CHANNELS};

/// Synthetic camera (`stub://name`).
///
/// Produces a slowly shifting gradient with light noise. Optionally fails
/// every Nth read to exercise the skipped-tick path.
pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    opened: bool,
    fail_every: Option<u64>,
}

impl SyntheticDevice {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            frame_count: 0,
            opened: false,
            fail_every: None,
        }
    }

    /// Fail every `n`th read (n > 0).
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * RGB_CHANNELS as usize;
        let mut rng = rand::thread_rng();
        let shift = (self.frame_count / 25) as usize;
        (0..pixel_count)
            .map(|i| (((i / 3 + shift) % 256) as u8).wrapping_add(rng.gen_range(0..4)))
            .collect()
    }
}

impl FrameDevice for SyntheticDevice {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("SyntheticDevice: opened stub://{}", self.name);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("stub://{} is not open", self.name));
        }
        self.frame_count += 1;
        if let Some(n) = self.fail_every {
            if self.frame_count % n == 0 {
                return Err(anyhow!("stub://{} simulated read failure", self.name));
            }
        }
        Frame::new(self.generate_pixels(), self.width, self.height, RGB_CHANNELS)
    }

    fn release(&mut self) {
        if self.opened {
            log::info!("SyntheticDevice: released stub://{}", self.name);
        }
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_open() {
        let mut device = SyntheticDevice::new("test", 4, 4);
        assert!(device.read().is_err());
        device.open().unwrap();
        assert!(device.read().is_ok());
        device.release();
        assert!(!device.is_open());
        assert!(device.read().is_err());
    }

    #[test]
    fn injected_failures_are_periodic() -> Result<()> {
        let mut device = SyntheticDevice::new("flaky", 2, 2).with_failure_every(3);
        device.open()?;
        let outcomes: Vec<bool> = (0..6).map(|_| device.read().is_ok()).collect();
        assert_eq!(outcomes, vec![true, true, false, true, true, false]);
        Ok(())
    }

    #[test]
    fn release_without_open_is_harmless() {
        let mut device = SyntheticDevice::new("idle", 2, 2);
        device.release();
        device.release();
        assert!(!device.is_open());
    }
}
