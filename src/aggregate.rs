//! Temporal aggregation of per-frame readings.
//!
//! Readings accumulate in a voting window. Once the window holds more than
//! `window` entries it is resolved and cleared:
//!
//! 1. If the current decision appears in the window at least once, it is
//!    amplified by appending `inertia_percent` of the window length (rounded
//!    down) extra copies.
//! 2. The first entry, in arrival order, whose count reaches
//!    `quorum_percent` of the (amplified) window length becomes the candidate.
//! 3. A candidate different from the current decision replaces it and is
//!    returned to the caller.
//!
//! Windows without a quorum are discarded; readings never carry over.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::plate::Reading;

pub const DEFAULT_WINDOW: usize = 10;
pub const DEFAULT_QUORUM_PERCENT: u32 = 60;
pub const DEFAULT_INERTIA_PERCENT: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSettings {
    /// Resolve once the window holds more than this many readings.
    pub window: usize,
    /// Share of the window a reading needs to be decided.
    pub quorum_percent: u32,
    /// Extra copies of the current decision, as a share of the window length.
    pub inertia_percent: u32,
}

impl Default for VotingSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            quorum_percent: DEFAULT_QUORUM_PERCENT,
            inertia_percent: DEFAULT_INERTIA_PERCENT,
        }
    }
}

impl VotingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(anyhow!("voting window must be greater than zero"));
        }
        if self.quorum_percent == 0 || self.quorum_percent > 100 {
            return Err(anyhow!("quorum_percent must be within 1..=100"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PlateAggregator {
    settings: VotingSettings,
    window: Vec<Reading>,
    decided: Option<Reading>,
}

impl PlateAggregator {
    pub fn new(settings: VotingSettings) -> Self {
        Self {
            window: Vec::with_capacity(settings.window + 1),
            settings,
            decided: None,
        }
    }

    /// Append a reading. Returns the new decision when this reading triggered
    /// a resolution that changed it.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        self.window.push(reading);
        if self.window.len() > self.settings.window {
            self.resolve()
        } else {
            None
        }
    }

    pub fn decided(&self) -> Option<&Reading> {
        self.decided.as_ref()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Forget the window and the current decision.
    pub fn reset(&mut self) {
        self.window.clear();
        self.decided = None;
    }

    fn resolve(&mut self) -> Option<Reading> {
        self.amplify_decided();

        let len = self.window.len();
        let winner = self
            .window
            .iter()
            .find(|entry| self.meets_quorum(self.count(entry), len))
            .cloned();

        self.window.clear();

        let winner = winner?;
        if self.decided.as_ref() == Some(&winner) {
            log::debug!("voting window resolved to unchanged decision {}", winner);
            return None;
        }
        log::info!(
            "decision changed: {} -> {}",
            self.decided
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string()),
            winner
        );
        self.decided = Some(winner.clone());
        Some(winner)
    }

    fn amplify_decided(&mut self) {
        let Some(decided) = self.decided.clone() else {
            return;
        };
        if self.count(&decided) == 0 {
            return;
        }
        let extra = self.window.len() * self.settings.inertia_percent as usize / 100;
        self.window.extend(std::iter::repeat(decided).take(extra));
    }

    fn count(&self, reading: &Reading) -> usize {
        self.window.iter().filter(|entry| *entry == reading).count()
    }

    fn meets_quorum(&self, count: usize, len: usize) -> bool {
        count * 100 >= len * self.settings.quorum_percent as usize
    }
}

impl Default for PlateAggregator {
    fn default() -> Self {
        Self::new(VotingSettings::default())
    }
}
