//! Inference worker.
//!
//! Decouples frame arrival from detector latency. Producers push frames into a
//! shared FIFO; a single worker thread takes the oldest pending frame and, if
//! more than two frames are still waiting at that moment, discards all of
//! them. It then runs detection and publishes one `Reading` per processed
//! frame on a channel.
//!
//! `stop()` joins the thread before returning. The result channel's only
//! sender lives on that thread, so once `stop()` returns the receiver sees the
//! remaining buffered readings and then disconnects.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::PlateDetector;
use crate::frame::Frame;
use crate::plate::{is_valid_plate, select_plate, Reading};

/// Largest backlog that survives a dequeue. A longer backlog is cleared
/// entirely.
pub const STALE_BACKLOG: usize = 2;

/// How long an idle worker sleeps before re-checking its stop flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// FIFO of pending frames with the freshness-over-completeness drop policy.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    dropped: u64,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    /// Dequeue the oldest frame. If more than `STALE_BACKLOG` frames remain
    /// after the dequeue, the remainder is discarded.
    pub fn take_next(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        if self.frames.len() > STALE_BACKLOG {
            let stale = self.frames.len();
            self.frames.clear();
            self.dropped += stale as u64;
            log::debug!("inference queue: dropped {} stale frames", stale);
        }
        Some(frame)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total frames discarded by the drop policy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

struct Shared {
    queue: Mutex<FrameQueue>,
    ready: Condvar,
    running: AtomicBool,
}

/// Cloneable producer handle onto a worker's queue.
#[derive(Clone)]
pub struct FrameSubmitter {
    shared: Arc<Shared>,
}

impl FrameSubmitter {
    /// Enqueue a frame without waiting for the worker.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| anyhow!("inference queue lock poisoned"))?;
        queue.push(frame);
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Discard all pending frames without processing them.
    pub fn clear(&self) -> Result<()> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| anyhow!("inference queue lock poisoned"))?;
        queue.clear();
        Ok(())
    }
}

pub struct InferenceWorker {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    /// Start the worker thread. Readings arrive on the returned receiver.
    pub fn spawn(detector: Box<dyn PlateDetector>) -> Result<(Self, Receiver<Reading>)> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            queue: Mutex::new(FrameQueue::new()),
            ready: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let shared_thread = shared.clone();
        let name = format!("inference-{}", detector.name());
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(shared_thread, detector, tx))?;
        Ok((
            Self {
                shared,
                join: Some(join),
            },
            rx,
        ))
    }

    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            shared: self.shared.clone(),
        }
    }

    pub fn submit(&self, frame: Frame) -> Result<()> {
        self.submitter().submit(frame)
    }

    /// Discard all pending frames without processing them.
    pub fn clear_queue(&self) -> Result<()> {
        self.submitter().clear()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared.queue.lock().map(|q| q.dropped()).unwrap_or(0)
    }

    /// Stop the worker and wait for its thread to exit. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.ready.notify_all();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("inference worker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("inference worker shutdown failed: {}", err);
        }
    }
}

/// Run one frame through detection and selection.
///
/// Detector failures count as zero candidates for this frame.
pub fn recognize(detector: &mut dyn PlateDetector, frame: &Frame) -> Reading {
    let candidates = match detector.detect(frame) {
        Ok(candidates) => candidates,
        Err(err) => {
            log::warn!("detector '{}' failed on frame: {}", detector.name(), err);
            Vec::new()
        }
    };
    log::debug!(
        "raw candidates: {:?}",
        candidates.iter().map(|c| c.text.as_str()).collect::<Vec<_>>()
    );
    let reading = select_plate(&candidates);
    log::debug!(
        "valid candidates: {}, selected: {}",
        candidates.iter().filter(|c| is_valid_plate(&c.text)).count(),
        reading
    );
    reading
}

fn run_worker(shared: Arc<Shared>, mut detector: Box<dyn PlateDetector>, tx: Sender<Reading>) {
    if let Err(err) = detector.warm_up() {
        log::warn!("detector '{}' warm-up failed: {}", detector.name(), err);
    }
    loop {
        let Some(frame) = next_frame(&shared) else {
            return;
        };
        let reading = recognize(detector.as_mut(), &frame);
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        if tx.send(reading).is_err() {
            log::debug!("inference results receiver closed; worker exiting");
            return;
        }
    }
}

/// Block until a frame is available or the worker is stopped.
fn next_frame(shared: &Shared) -> Option<Frame> {
    let mut queue = match shared.queue.lock() {
        Ok(queue) => queue,
        Err(_) => {
            log::error!("inference queue lock poisoned; worker exiting");
            return None;
        }
    };
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(frame) = queue.take_next() {
            return Some(frame);
        }
        queue = match shared.ready.wait_timeout(queue, IDLE_WAIT) {
            Ok((queue, _)) => queue,
            Err(_) => {
                log::error!("inference queue lock poisoned; worker exiting");
                return None;
            }
        };
    }
}
