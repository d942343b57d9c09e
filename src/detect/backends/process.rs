//! External-process detector backend.
//!
//! The recognition model runs as a separate program. For each frame the backend:
//! - spawns the configured command
//! - writes the frame to its stdin as a binary PPM (P6, RGB)
//! - reads a JSON array of candidates from its stdout:
//!   `[{"text": "A123BC45", "box": [x1, y1, x2, y2]}, ...]`
//!
//! Empty stdout means no candidates. A non-zero exit status, unparseable
//! output, or a run longer than the timeout is an error for that frame only.
//! A timed-out child is killed.
//!
//! The frame is written from a helper thread while stdout and stderr are
//! drained on their own threads, so a chatty child cannot fill a pipe and
//! stall both sides.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::detect::backend::PlateDetector;
use crate::detect::result::{Candidate, Region};
use crate::frame::{Frame, RGB_CHANNELS};

#[derive(Debug, Deserialize)]
struct WireCandidate {
    text: String,
    #[serde(rename = "box")]
    region: [f32; 4],
}

/// Upper bound on one detector run unless configured otherwise.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProcessDetector {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessDetector {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(anyhow!("process detector requires a command"));
        }
        Ok(Self {
            command,
            args,
            timeout: DEFAULT_PROCESS_TIMEOUT,
        })
    }

    /// Kill the child if a single frame takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PlateDetector for ProcessDetector {
    fn name(&self) -> &'static str {
        "process"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        if frame.channels() != RGB_CHANNELS {
            return Err(anyhow!(
                "process detector expects RGB frames, got {} channels",
                frame.channels()
            ));
        }
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn detector '{}'", self.command))?;

        let mut stdin = child.stdin.take().context("detector stdin unavailable")?;
        let stdout = child.stdout.take().context("detector stdout unavailable")?;
        let stderr = child.stderr.take().context("detector stderr unavailable")?;

        let frame = frame.clone();
        let writer = std::thread::Builder::new()
            .name("detector-stdin".to_string())
            .spawn(move || write_ppm(&mut stdin, &frame))?;
        let stdout = drain_pipe("detector-stdout", stdout)?;
        let stderr = drain_pipe("detector-stderr", stderr)?;

        let Some(status) = child
            .wait_timeout(self.timeout)
            .context("failed to wait for detector")?
        else {
            let _ = child.kill();
            let _ = child.wait();
            // Pipe threads are left to finish on their own once the pipes close.
            return Err(anyhow!(
                "detector '{}' killed after exceeding {:?}",
                self.command,
                self.timeout
            ));
        };

        let stdout = join_pipe(stdout)?;
        let stderr = join_pipe(stderr)?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::debug!(
                "detector '{}' did not read the whole frame: {}",
                self.command,
                err
            ),
            Err(_) => return Err(anyhow!("detector stdin thread panicked")),
        }

        if !status.success() {
            return Err(anyhow!(
                "detector '{}' exited with {}: {}",
                self.command,
                status,
                String::from_utf8_lossy(&stderr).trim()
            ));
        }
        parse_candidates(&stdout)
    }
}

fn drain_pipe<R>(name: &str, mut pipe: R) -> Result<JoinHandle<std::io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })?;
    Ok(handle)
}

fn join_pipe(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("detector pipe thread panicked"))?
        .context("failed to read detector output")
}

fn write_ppm(out: &mut impl Write, frame: &Frame) -> Result<()> {
    if frame.channels() != RGB_CHANNELS {
        return Err(anyhow!(
            "process detector expects RGB frames, got {} channels",
            frame.channels()
        ));
    }
    write!(out, "P6\n{} {}\n255\n", frame.width(), frame.height())?;
    out.write_all(frame.pixels())?;
    out.flush()?;
    Ok(())
}

pub(crate) fn parse_candidates(stdout: &[u8]) -> Result<Vec<Candidate>> {
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let wire: Vec<WireCandidate> =
        serde_json::from_slice(stdout).map_err(|e| anyhow!("malformed detector output: {}", e))?;
    Ok(wire
        .into_iter()
        .map(|c| Candidate::new(c.text, Region::from_corners(c.region)))
        .collect())
}
