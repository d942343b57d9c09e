//! Plate grammar and candidate selection.
//!
//! A plate is one letter, three digits, two letters, two digits and an
//! optional third digit (`A123BC45`, `A123BC456`). Letters are matched
//! case-insensitively; anything else is dropped, never repaired.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::detect::Candidate;

const PLATE_PATTERN: &str = r"^[A-Za-z][0-9]{3}[A-Za-z]{2}[0-9]{2}[0-9]?$";

fn plate_regex() -> &'static Regex {
    static PLATE_RE: OnceLock<Regex> = OnceLock::new();
    PLATE_RE.get_or_init(|| Regex::new(PLATE_PATTERN).expect("plate pattern is valid"))
}

/// True when `text` follows the plate grammar.
pub fn is_valid_plate(text: &str) -> bool {
    plate_regex().is_match(text)
}

/// Outcome of one inference cycle, and the value voted on by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reading {
    Plate(String),
    Unrecognized,
}

impl Reading {
    pub fn plate(&self) -> Option<&str> {
        match self {
            Reading::Plate(text) => Some(text),
            Reading::Unrecognized => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Reading::Plate(_))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Plate(text) => f.write_str(text),
            Reading::Unrecognized => f.write_str("unrecognized"),
        }
    }
}

/// Drop malformed candidates and keep the widest survivor.
///
/// Width stands in for proximity: the largest plate in frame is the vehicle
/// at the barrier. Ties keep the detector's original order.
pub fn select_plate(candidates: &[Candidate]) -> Reading {
    let mut best: Option<&Candidate> = None;
    for candidate in candidates.iter().filter(|c| is_valid_plate(&c.text)) {
        match best {
            Some(current) if candidate.region.width() <= current.region.width() => {}
            _ => best = Some(candidate),
        }
    }
    match best {
        Some(candidate) => Reading::Plate(candidate.text.clone()),
        None => Reading::Unrecognized,
    }
}
