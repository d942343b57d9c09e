//! Timer-driven capture.
//!
//! A `CaptureUnit` owns one device. `start()` opens it and spawns a thread
//! that reads one frame per tick, at most `target_fps` ticks per second.
//! Every `submit_every`th good frame is handed to the sink; failed reads are
//! skipped. `stop()` joins the thread, which releases the device on its way out.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::FrameDevice;
use crate::frame::Frame;

pub const DEFAULT_TARGET_FPS: u32 = 120;
pub const DEFAULT_SUBMIT_EVERY: u32 = 10;
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Consecutive failed reads before the device is reported unhealthy.
const PERSISTENT_FAILURE_TICKS: u32 = 50;

pub type FrameSink = Box<dyn FnMut(Frame) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Ceiling on capture ticks per second.
    pub target_fps: u32,
    /// Only every Nth captured frame goes to inference.
    pub submit_every: u32,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            submit_every: DEFAULT_SUBMIT_EVERY,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl CaptureSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be greater than zero"));
        }
        if self.submit_every == 0 {
            return Err(anyhow!("capture submit_every must be greater than zero"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        Ok(())
    }

    /// Tick interval derived from the fps ceiling, in whole milliseconds.
    pub fn interval(&self) -> Duration {
        let ms = 1000 / self.target_fps.max(1);
        Duration::from_millis(ms.max(1) as u64)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_submitted: u64,
    pub read_failures: u64,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    submitted: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
}

pub struct CaptureUnit {
    settings: CaptureSettings,
    device: Option<Box<dyn FrameDevice>>,
    description: String,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl CaptureUnit {
    pub fn new(device: Box<dyn FrameDevice>, settings: CaptureSettings) -> Self {
        Self {
            settings,
            description: device.describe(),
            device: Some(device),
            shutdown: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            join: None,
        }
    }

    /// Open the device and begin periodic capture.
    pub fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        if self.join.is_some() {
            return Err(anyhow!("capture for {} already running", self.description));
        }
        let mut device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("capture for {} already stopped", self.description))?;
        if let Err(err) = device.open() {
            device.release();
            return Err(err.context(format!("failed to open {}", self.description)));
        }

        let settings = self.settings;
        let shutdown = self.shutdown.clone();
        let counters = self.counters.clone();
        let join = std::thread::Builder::new()
            .name(format!("capture-{}", self.description))
            .spawn(move || {
                run_capture(device.as_mut(), &settings, &shutdown, &counters, &mut sink);
                device.release();
            })?;
        self.join = Some(join);
        log::info!(
            "capture started for {} (interval {:?}, every {} frame(s) to inference)",
            self.description,
            self.settings.interval(),
            self.settings.submit_every
        );
        Ok(())
    }

    /// Halt capture and release the device. Idempotent; safe if never started.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut device) = self.device.take() {
            device.release();
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture thread for {} panicked", self.description))?;
            log::info!("capture stopped for {}", self.description);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    /// False once reads have failed for a sustained run of ticks.
    pub fn is_healthy(&self) -> bool {
        self.counters.consecutive_failures.load(Ordering::Relaxed) < PERSISTENT_FAILURE_TICKS
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_submitted: self.counters.submitted.load(Ordering::Relaxed),
            read_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn describe(&self) -> &str {
        &self.description
    }
}

impl Drop for CaptureUnit {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("capture shutdown failed: {}", err);
        }
    }
}

fn run_capture(
    device: &mut dyn FrameDevice,
    settings: &CaptureSettings,
    shutdown: &AtomicBool,
    counters: &Counters,
    sink: &mut FrameSink,
) {
    let interval = settings.interval();
    let submit_every = settings.submit_every.max(1) as u64;
    let mut fps_window = Instant::now();
    let mut fps_count = 0u32;

    while !shutdown.load(Ordering::SeqCst) {
        let tick = Instant::now();
        match device.read() {
            Ok(frame) => {
                counters.consecutive_failures.store(0, Ordering::Relaxed);
                let captured = counters.captured.fetch_add(1, Ordering::Relaxed) + 1;
                fps_count += 1;
                if captured % submit_every == 0 {
                    sink(frame);
                    counters.submitted.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                let streak = counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if streak == PERSISTENT_FAILURE_TICKS {
                    log::warn!(
                        "{}: {} consecutive read failures, latest: {}",
                        device.describe(),
                        streak,
                        err
                    );
                } else {
                    log::debug!("{}: read skipped: {}", device.describe(), err);
                }
            }
        }

        if fps_window.elapsed() >= Duration::from_secs(1) {
            log::debug!("{}: {} fps", device.describe(), fps_count);
            fps_window = Instant::now();
            fps_count = 0;
        }

        if let Some(rest) = interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}
