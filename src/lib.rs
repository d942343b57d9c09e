//! Plate Gate
//!
//! Vehicle access control for a gated facility.
//!
//! # Architecture
//!
//! Every active camera runs as an independent session made of three units:
//!
//! 1. **Capture**: a timer-driven thread reading frames from a device.
//! 2. **Inference**: a queue-driven thread running the plate detector on the
//!    freshest frame, dropping stale backlog.
//! 3. **Decision flow**: folds per-frame readings into a voting window,
//!    resolves a stable plate, and asks the access controller for a verdict.
//!
//! Units communicate over explicit queues and channels; sessions share nothing
//! except the roster store, which each session opens on its own connection.
//!
//! # Module Structure
//!
//! - `frame`: immutable pixel buffers
//! - `ingest`: capture devices and the capture unit
//! - `detect`: detector boundary and backends
//! - `plate`: plate grammar and candidate selection
//! - `worker`: the inference worker and its frame queue
//! - `aggregate`: voting window with quorum and decision inertia
//! - `access`: allow/ask/deny policy and crossing records
//! - `storage`: roster and crossing persistence
//! - `session`: camera sessions and their registry
//! - `config`: layered file and environment configuration
//! - `ui`: console stages and the operator prompt
//! - Core types: Direction, Employee, CrossingEvent, CrossingRow

use anyhow::{anyhow, Result};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod access;
pub mod aggregate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod plate;
pub mod session;
pub mod storage;
pub mod ui;
pub mod worker;

pub use access::{
    AccessController, AccessOutcome, AlwaysAllow, AlwaysDeny, Barrier, DecisionProvider,
    LogBarrier, Persistence, Verdict,
};
pub use aggregate::{PlateAggregator, VotingSettings};
pub use detect::{Candidate, DetectorRegistry, PlateDetector, ProcessDetector, Region, StubDetector};
pub use frame::Frame;
pub use ingest::{open_device, CaptureSettings, CaptureUnit, FrameDevice, SyntheticDevice};
pub use plate::{is_valid_plate, select_plate, Reading};
pub use session::{DecisionFlow, SessionEvent, SessionId, SessionInfo, SessionManager, SessionSpec};
pub use storage::{InMemoryRosterStore, RosterStore, SqliteOpener, SqliteRosterStore, StoreOpener};
pub use worker::{FrameQueue, InferenceWorker};

/// Schema limit for plate text (`Cars.plate`, `Employees.car_plate`).
pub const MAX_PLATE_LEN: usize = 9;
/// Schema limit for `Employees.name`.
pub const MAX_NAME_LEN: usize = 25;
/// Schema limit for `Employees.department`.
pub const MAX_DEPARTMENT_LEN: usize = 50;

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:plate_gate_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Directions --------------------

/// Which way a monitored point is crossed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entry,
    Exit,
    #[default]
    Unspecified,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
            Direction::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(Direction::Entry),
            "exit" => Ok(Direction::Exit),
            "" | "unspecified" => Ok(Direction::Unspecified),
            other => Err(anyhow!(
                "unknown direction '{}' (expected entry, exit or unspecified)",
                other
            )),
        }
    }
}

// -------------------- Roster --------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub plate: String,
}

/// Employee fields before the store assigns an id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEmployee {
    pub name: String,
    pub department: String,
    pub plate: String,
}

impl NewEmployee {
    pub fn new(name: &str, department: &str, plate: &str) -> Result<Self> {
        let employee = Self {
            name: name.trim().to_string(),
            department: department.trim().to_string(),
            plate: plate.trim().to_string(),
        };
        employee.validate()?;
        Ok(employee)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("employee name must not be empty"));
        }
        if self.name.chars().count() > MAX_NAME_LEN {
            return Err(anyhow!("employee name exceeds {} characters", MAX_NAME_LEN));
        }
        if self.department.chars().count() > MAX_DEPARTMENT_LEN {
            return Err(anyhow!(
                "department exceeds {} characters",
                MAX_DEPARTMENT_LEN
            ));
        }
        validate_plate_len(&self.plate)
    }
}

// -------------------- Crossings --------------------

/// A persisted record of a vehicle passing a monitored point.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossingEvent {
    pub plate: String,
    pub direction: Direction,
    /// seconds since epoch
    pub timestamp_s: u64,
    pub employee_id: Option<i64>,
}

impl CrossingEvent {
    pub fn now(plate: &str, direction: Direction, employee_id: Option<i64>) -> Result<Self> {
        let ev = Self {
            plate: plate.to_string(),
            direction,
            timestamp_s: now_s()?,
            employee_id,
        };
        ev.validate()?;
        Ok(ev)
    }

    pub fn validate(&self) -> Result<()> {
        validate_plate_len(&self.plate)
    }
}

/// One row of the crossings table view: crossings left-joined with employees.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossingRow {
    pub plate: String,
    pub name: Option<String>,
    pub department: Option<String>,
    pub direction: Direction,
    pub timestamp_s: u64,
}

fn validate_plate_len(plate: &str) -> Result<()> {
    if plate.is_empty() {
        return Err(anyhow!("plate must not be empty"));
    }
    if plate.chars().count() > MAX_PLATE_LEN {
        return Err(anyhow!(
            "plate '{}' exceeds {} characters",
            plate,
            MAX_PLATE_LEN
        ));
    }
    Ok(())
}
