//! Access decisions for decided plates.
//!
//! Roster members are let through without asking. Unknown plates go to an
//! injected `DecisionProvider`, which blocks the calling session until it
//! answers. Every allow verdict opens the barrier and records exactly one
//! crossing; a deny records nothing.
//!
//! Storage problems never change a verdict. They are attached to the outcome
//! so the session can notify the operator.

use std::fmt;
use std::sync::Arc;

use crate::storage::RosterStore;
use crate::{CrossingEvent, Direction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::Deny => f.write_str("deny"),
        }
    }
}

/// Answers for plates that are not on the roster.
pub trait DecisionProvider: Send + Sync {
    /// Blocking yes/no question for one unknown plate.
    fn confirm(&self, plate: &str, direction: Direction) -> Verdict;

    /// One-way operator notification. Must not wait for the operator.
    fn notify(&self, message: &str) {
        log::warn!("operator notice: {}", message);
    }

    /// Notification the operator has to acknowledge before the caller goes on.
    fn notify_blocking(&self, message: &str) {
        self.notify(message);
    }
}

pub struct AlwaysAllow;

impl DecisionProvider for AlwaysAllow {
    fn confirm(&self, _plate: &str, _direction: Direction) -> Verdict {
        Verdict::Allow
    }
}

pub struct AlwaysDeny;

impl DecisionProvider for AlwaysDeny {
    fn confirm(&self, _plate: &str, _direction: Direction) -> Verdict {
        Verdict::Deny
    }
}

/// Physical actuator at the crossing point.
pub trait Barrier: Send + Sync {
    fn open(&self, plate: &str, direction: Direction);
}

/// Barrier that only logs. Stands in until an actuator is wired.
pub struct LogBarrier;

impl Barrier for LogBarrier {
    fn open(&self, plate: &str, direction: Direction) {
        log::info!("barrier opened for {} ({})", plate, direction);
    }
}

/// What happened to the crossing record for one decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Persistence {
    /// Stored under this row id.
    Recorded(i64),
    /// Nothing to store (deny).
    Skipped,
    /// Session runs without a store.
    Unavailable,
    /// The write failed.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessOutcome {
    pub plate: String,
    pub direction: Direction,
    pub verdict: Verdict,
    pub employee_id: Option<i64>,
    /// True when the decision provider was consulted.
    pub prompted: bool,
    pub persistence: Persistence,
    /// Set when the roster lookup failed and the plate was treated as unknown.
    pub lookup_error: Option<String>,
}

impl AccessOutcome {
    /// First storage problem worth reporting, if any.
    pub fn storage_error(&self) -> Option<String> {
        if let Some(err) = &self.lookup_error {
            return Some(format!("roster lookup failed for {}: {}", self.plate, err));
        }
        match &self.persistence {
            Persistence::Failed(err) => {
                Some(format!("crossing for {} not recorded: {}", self.plate, err))
            }
            _ => None,
        }
    }
}

pub struct AccessController {
    store: Option<Box<dyn RosterStore>>,
    provider: Arc<dyn DecisionProvider>,
    barrier: Arc<dyn Barrier>,
}

impl AccessController {
    pub fn new(
        store: Option<Box<dyn RosterStore>>,
        provider: Arc<dyn DecisionProvider>,
        barrier: Arc<dyn Barrier>,
    ) -> Self {
        Self {
            store,
            provider,
            barrier,
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Tell the operator something without holding up the decision flow.
    pub fn notify(&self, message: &str) {
        self.provider.notify(message);
    }

    pub fn decide(&mut self, plate: &str, direction: Direction) -> AccessOutcome {
        let (employee_id, lookup_error) = match self.store.as_mut() {
            Some(store) => match store.find_employee_by_plate(plate) {
                Ok(id) => (id, None),
                Err(err) => {
                    log::error!("roster lookup for {} failed: {:#}", plate, err);
                    (None, Some(format!("{:#}", err)))
                }
            },
            None => (None, None),
        };

        let (verdict, prompted) = match employee_id {
            Some(id) => {
                log::info!("{} belongs to employee {}; allowing {}", plate, id, direction);
                (Verdict::Allow, false)
            }
            None => {
                log::info!("{} is not on the roster; asking operator", plate);
                (self.provider.confirm(plate, direction), true)
            }
        };
        log::info!("access {} for {} ({})", verdict, plate, direction);

        let persistence = match verdict {
            Verdict::Deny => Persistence::Skipped,
            Verdict::Allow => {
                self.barrier.open(plate, direction);
                self.persist(plate, direction, employee_id)
            }
        };

        AccessOutcome {
            plate: plate.to_string(),
            direction,
            verdict,
            employee_id,
            prompted,
            persistence,
            lookup_error,
        }
    }

    fn persist(
        &mut self,
        plate: &str,
        direction: Direction,
        employee_id: Option<i64>,
    ) -> Persistence {
        let Some(store) = self.store.as_mut() else {
            log::warn!("no store; crossing for {} not recorded", plate);
            return Persistence::Unavailable;
        };
        let result = CrossingEvent::now(plate, direction, employee_id)
            .and_then(|event| store.record_crossing(&event));
        match result {
            Ok(id) => Persistence::Recorded(id),
            Err(err) => {
                log::error!("failed to record crossing for {}: {:#}", plate, err);
                Persistence::Failed(format!("{:#}", err))
            }
        }
    }
}
