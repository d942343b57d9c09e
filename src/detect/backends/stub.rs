use anyhow::{anyhow, Result};

use crate::detect::backend::PlateDetector;
use crate::detect::result::Candidate;
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// Replays a script of per-frame outputs in a loop. A `None` step simulates a
/// model failure for that frame. An empty script never detects anything.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    script: Vec<Option<Vec<Candidate>>>,
    cursor: usize,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the same candidates for every frame.
    pub fn fixed(candidates: Vec<Candidate>) -> Self {
        Self::scripted(vec![Some(candidates)])
    }

    pub fn scripted(script: Vec<Option<Vec<Candidate>>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Number of frames seen so far.
    pub fn calls(&self) -> usize {
        self.cursor
    }
}

impl PlateDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Candidate>> {
        if self.script.is_empty() {
            self.cursor += 1;
            return Ok(Vec::new());
        }
        let step = &self.script[self.cursor % self.script.len()];
        self.cursor += 1;
        match step {
            Some(candidates) => Ok(candidates.clone()),
            None => Err(anyhow!("stub detector scripted failure")),
        }
    }
}
