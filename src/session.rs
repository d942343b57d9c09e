//! Camera sessions.
//!
//! A session binds one device and one detector to a crossing direction and
//! runs three threads: capture, inference, and the decision flow. Readings
//! move capture -> worker queue -> result channel -> flow; the flow publishes
//! `SessionEvent`s on a channel owned by whoever started the session.
//!
//! Teardown order is capture, queue, worker, flow. Each step joins its thread,
//! so when `stop()` returns the event channel has disconnected.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::access::{AccessController, AccessOutcome, Barrier, DecisionProvider};
use crate::aggregate::{PlateAggregator, VotingSettings};
use crate::detect::PlateDetector;
use crate::frame::Frame;
use crate::ingest::{CaptureSettings, CaptureStats, CaptureUnit, FrameDevice};
use crate::plate::Reading;
use crate::storage::StoreOpener;
use crate::worker::{FrameSubmitter, InferenceWorker};
use crate::Direction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// One processed frame.
    Reading(Reading),
    /// The voting window settled on a new plate (or on "unrecognized").
    DecisionChanged(Reading),
    /// Verdict for a decided plate.
    Access(AccessOutcome),
    /// The store could not be opened; the session runs without persistence.
    StoreUnavailable(String),
    /// A lookup or write failed mid-session.
    StoreError(String),
}

// -------------------- Decision flow --------------------

/// Readings in, events out. Owns the aggregator and the access controller for
/// one session, so resolution is strictly sequential.
pub struct DecisionFlow {
    aggregator: PlateAggregator,
    controller: AccessController,
    direction: Direction,
}

impl DecisionFlow {
    pub fn new(
        aggregator: PlateAggregator,
        controller: AccessController,
        direction: Direction,
    ) -> Self {
        Self {
            aggregator,
            controller,
            direction,
        }
    }

    pub fn handle(&mut self, reading: Reading) -> Vec<SessionEvent> {
        let mut events = vec![SessionEvent::Reading(reading.clone())];
        let Some(decided) = self.aggregator.push(reading) else {
            return events;
        };
        events.push(SessionEvent::DecisionChanged(decided.clone()));

        match decided {
            Reading::Plate(plate) => {
                let outcome = self.controller.decide(&plate, self.direction);
                if let Some(message) = outcome.storage_error() {
                    self.controller.notify(&message);
                    events.push(SessionEvent::StoreError(message));
                }
                events.push(SessionEvent::Access(outcome));
            }
            Reading::Unrecognized => {
                log::info!("decision is unrecognized; nothing to act on");
            }
        }
        events
    }

    pub fn decided(&self) -> Option<&Reading> {
        self.aggregator.decided()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

// -------------------- Sessions --------------------

/// Everything a session needs that is specific to one camera.
pub struct SessionSpec {
    pub name: String,
    pub device: Box<dyn FrameDevice>,
    pub detector: Box<dyn PlateDetector>,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub device: String,
    pub direction: Direction,
    pub healthy: bool,
    pub stats: CaptureStats,
}

struct CameraSession {
    name: String,
    direction: Direction,
    capture: CaptureUnit,
    worker: InferenceWorker,
    stopping: Arc<AtomicBool>,
    flow: Option<JoinHandle<()>>,
}

impl CameraSession {
    fn stop(&mut self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let mut first_err = None;
        if let Err(err) = self.capture.stop() {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.worker.clear_queue() {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.worker.stop() {
            first_err.get_or_insert(err);
        }
        if let Some(join) = self.flow.take() {
            if join.join().is_err() {
                first_err.get_or_insert(anyhow!("decision flow for {} panicked", self.name));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn info(&self, id: SessionId) -> SessionInfo {
        SessionInfo {
            id,
            name: self.name.clone(),
            device: self.capture.describe().to_string(),
            direction: self.direction,
            healthy: self.capture.is_healthy(),
            stats: self.capture.stats(),
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("session {} shutdown failed: {}", self.name, err);
        }
    }
}

/// Feeds worker readings through the flow until the worker disconnects.
///
/// Readings that queued up while a decision was being made (possibly behind
/// an operator prompt) describe a vehicle that has already been handled, so
/// they are dropped together with any frames still waiting for inference.
fn run_flow(
    name: String,
    mut flow: DecisionFlow,
    readings: Receiver<Reading>,
    events: Sender<SessionEvent>,
    stopping: Arc<AtomicBool>,
    queue: Option<FrameSubmitter>,
) {
    while let Ok(reading) = readings.recv() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let produced = flow.handle(reading);
        let decided = produced
            .iter()
            .any(|event| matches!(event, SessionEvent::DecisionChanged(_)));
        for event in produced {
            if events.send(event).is_err() {
                log::debug!("{}: event receiver dropped", name);
            }
        }
        if decided {
            if let Some(queue) = &queue {
                if let Err(err) = queue.clear() {
                    log::error!("{}: failed to clear inference queue: {}", name, err);
                }
            }
            let stale = readings.try_iter().count();
            if stale > 0 {
                log::debug!("{}: dropped {} readings queued during decision", name, stale);
            }
        }
    }
    log::debug!("{}: decision flow finished", name);
}

/// Registry of running camera sessions.
pub struct SessionManager {
    store: Arc<dyn StoreOpener>,
    provider: Arc<dyn DecisionProvider>,
    barrier: Arc<dyn Barrier>,
    capture: CaptureSettings,
    voting: VotingSettings,
    sessions: BTreeMap<SessionId, CameraSession>,
    next_id: u64,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn StoreOpener>,
        provider: Arc<dyn DecisionProvider>,
        barrier: Arc<dyn Barrier>,
        capture: CaptureSettings,
        voting: VotingSettings,
    ) -> Self {
        Self {
            store,
            provider,
            barrier,
            capture,
            voting,
            sessions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Start a session. Events for it arrive on the returned receiver until
    /// the session is stopped.
    ///
    /// A store that cannot be opened does not prevent the session from
    /// starting: the operator must acknowledge a notice first, then the
    /// session runs without persistence.
    pub fn start(&mut self, spec: SessionSpec) -> Result<(SessionId, Receiver<SessionEvent>)> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(anyhow!("session name must not be empty"));
        }
        if self.sessions.values().any(|s| s.name == name) {
            return Err(anyhow!("a session named {} is already running", name));
        }
        self.capture.validate()?;
        self.voting.validate()?;

        let (events_tx, events_rx) = mpsc::channel();
        let store = match self.store.open() {
            Ok(store) => Some(store),
            Err(err) => {
                let message = format!(
                    "{}: store {} unavailable, running without persistence: {:#}",
                    name,
                    self.store.describe(),
                    err
                );
                log::error!("{}", message);
                self.provider.notify_blocking(&message);
                let _ = events_tx.send(SessionEvent::StoreUnavailable(message));
                None
            }
        };
        let controller = AccessController::new(store, self.provider.clone(), self.barrier.clone());
        let flow = DecisionFlow::new(PlateAggregator::new(self.voting), controller, spec.direction);

        let (mut worker, readings) = InferenceWorker::spawn(spec.detector)?;
        let stopping = Arc::new(AtomicBool::new(false));
        let flow_join = {
            let name = name.clone();
            let stopping = stopping.clone();
            let queue = worker.submitter();
            std::thread::Builder::new()
                .name(format!("flow-{}", name))
                .spawn(move || run_flow(name, flow, readings, events_tx, stopping, Some(queue)))
        };
        let flow_join = match flow_join {
            Ok(join) => join,
            Err(err) => {
                worker.stop()?;
                return Err(err.into());
            }
        };

        let mut session = CameraSession {
            name: name.clone(),
            direction: spec.direction,
            capture: CaptureUnit::new(spec.device, self.capture),
            worker,
            stopping,
            flow: Some(flow_join),
        };
        let submitter = session.worker.submitter();
        session.capture.start(Box::new(move |frame: Frame| {
            if let Err(err) = submitter.submit(frame) {
                log::error!("frame submission failed: {}", err);
            }
        }))?;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        log::info!(
            "{} started: {} on {} ({})",
            id,
            name,
            session.capture.describe(),
            spec.direction
        );
        self.sessions.insert(id, session);
        Ok((id, events_rx))
    }

    pub fn stop(&mut self, id: SessionId) -> Result<()> {
        let mut session = self
            .sessions
            .remove(&id)
            .ok_or_else(|| anyhow!("no running session {}", id))?;
        session.stop()?;
        log::info!("{} stopped: {}", id, session.name);
        Ok(())
    }

    pub fn stop_all(&mut self) -> Result<()> {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        let mut first_err = None;
        for id in ids {
            if let Err(err) = self.stop(id) {
                log::error!("failed to stop {}: {}", id, err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|(id, session)| session.info(*id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Err(err) = self.stop_all() {
            log::error!("session manager shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AlwaysAllow, AlwaysDeny, LogBarrier, Verdict};
    use crate::detect::{Candidate, Region, StubDetector};
    use crate::ingest::SyntheticDevice;
    use crate::storage::{InMemoryRosterStore, RosterStore};
    use crate::NewEmployee;
    use std::sync::Mutex;
    use std::time::Duration;

    fn plate(text: &str) -> Reading {
        Reading::Plate(text.to_string())
    }

    fn flow_with(store: &InMemoryRosterStore, provider: Arc<dyn DecisionProvider>) -> DecisionFlow {
        let controller = AccessController::new(
            Some(Box::new(store.clone())),
            provider,
            Arc::new(LogBarrier),
        );
        DecisionFlow::new(
            PlateAggregator::new(VotingSettings::default()),
            controller,
            Direction::Entry,
        )
    }

    fn access_events(events: &[SessionEvent]) -> Vec<&AccessOutcome> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Access(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn flow_decides_once_per_stable_plate() -> Result<()> {
        let mut store = InMemoryRosterStore::new();
        store.add_employee(&NewEmployee::new("Ivanov", "Logistics", "A123BC45")?)?;
        let mut flow = flow_with(&store, Arc::new(AlwaysDeny));

        let mut events = Vec::new();
        for _ in 0..33 {
            events.extend(flow.handle(plate("A123BC45")));
        }
        assert_eq!(access_events(&events).len(), 1);
        assert_eq!(store.crossings()?.len(), 1);
        assert_eq!(flow.decided(), Some(&plate("A123BC45")));
        Ok(())
    }

    #[test]
    fn unrecognized_decision_is_not_acted_on() -> Result<()> {
        let store = InMemoryRosterStore::new();
        let mut flow = flow_with(&store, Arc::new(AlwaysAllow));

        let mut events = Vec::new();
        for _ in 0..11 {
            events.extend(flow.handle(Reading::Unrecognized));
        }
        assert!(events.contains(&SessionEvent::DecisionChanged(Reading::Unrecognized)));
        assert!(access_events(&events).is_empty());
        assert!(store.crossings()?.is_empty());
        Ok(())
    }

    #[test]
    fn flow_reports_write_failures() -> Result<()> {
        let store = InMemoryRosterStore::new();
        store.set_fail_writes(true)?;
        let mut flow = flow_with(&store, Arc::new(AlwaysAllow));

        let mut events = Vec::new();
        for _ in 0..11 {
            events.extend(flow.handle(plate("B777KK99")));
        }
        let errors = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::StoreError(_)))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(access_events(&events)[0].verdict, Verdict::Allow);
        Ok(())
    }

    fn fast_capture() -> CaptureSettings {
        CaptureSettings {
            target_fps: 500,
            submit_every: 1,
            width: 8,
            height: 8,
        }
    }

    fn stub_spec(name: &str, text: &str) -> SessionSpec {
        SessionSpec {
            name: name.to_string(),
            device: Box::new(SyntheticDevice::new(name, 8, 8)),
            detector: Box::new(StubDetector::fixed(vec![Candidate::new(
                text,
                Region::new(0.0, 0.0, 120.0, 30.0),
            )])),
            direction: Direction::Entry,
        }
    }

    fn wait_for_access(rx: &Receiver<SessionEvent>) -> Result<AccessOutcome> {
        loop {
            match rx.recv_timeout(Duration::from_secs(10))? {
                SessionEvent::Access(outcome) => return Ok(outcome),
                _ => continue,
            }
        }
    }

    #[test]
    fn session_runs_end_to_end_and_stops_cleanly() -> Result<()> {
        let mut roster = InMemoryRosterStore::new();
        let id = roster.add_employee(&NewEmployee::new("Ivanov", "Logistics", "A123BC45")?)?;
        let mut manager = SessionManager::new(
            Arc::new(roster.clone()),
            Arc::new(AlwaysDeny),
            Arc::new(LogBarrier),
            fast_capture(),
            VotingSettings::default(),
        );

        let (session, rx) = manager.start(stub_spec("gate-in", "A123BC45"))?;
        assert_eq!(manager.list().len(), 1);
        assert!(manager.start(stub_spec("gate-in", "A123BC45")).is_err());

        let outcome = wait_for_access(&rx)?;
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.employee_id, Some(id));
        assert!(!outcome.prompted);

        manager.stop(session)?;
        assert!(manager.is_empty());
        let _ = rx.try_iter().count();
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
        assert_eq!(roster.crossings()?.len(), 1);
        assert!(manager.stop(session).is_err());
        Ok(())
    }

    struct FailingOpener;

    impl StoreOpener for FailingOpener {
        fn describe(&self) -> String {
            "unreachable".to_string()
        }

        fn open(&self) -> Result<Box<dyn RosterStore>> {
            Err(anyhow!("connection refused"))
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        notices: Mutex<Vec<String>>,
        acknowledged: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn notices(&self) -> usize {
            self.notices.lock().map(|n| n.len()).unwrap_or(0)
        }

        fn acknowledged(&self) -> usize {
            self.acknowledged.lock().map(|n| n.len()).unwrap_or(0)
        }
    }

    impl DecisionProvider for RecordingProvider {
        fn confirm(&self, _plate: &str, _direction: Direction) -> Verdict {
            Verdict::Allow
        }

        fn notify(&self, message: &str) {
            if let Ok(mut notices) = self.notices.lock() {
                notices.push(message.to_string());
            }
        }

        fn notify_blocking(&self, message: &str) {
            if let Ok(mut acknowledged) = self.acknowledged.lock() {
                acknowledged.push(message.to_string());
            }
        }
    }

    #[test]
    fn write_failure_notice_does_not_wait_for_operator() -> Result<()> {
        let store = InMemoryRosterStore::new();
        store.set_fail_writes(true)?;
        let provider = Arc::new(RecordingProvider::default());
        let mut flow = flow_with(&store, provider.clone());

        for _ in 0..11 {
            flow.handle(plate("B777KK99"));
        }
        assert_eq!(provider.notices(), 1);
        assert_eq!(provider.acknowledged(), 0);
        Ok(())
    }

    #[test]
    fn readings_queued_during_decision_are_dropped() -> Result<()> {
        let store = InMemoryRosterStore::new();
        let flow = flow_with(&store, Arc::new(AlwaysAllow));
        let (readings_tx, readings_rx) = mpsc::channel();
        for _ in 0..11 {
            readings_tx.send(plate("A123BC45"))?;
        }
        for _ in 0..30 {
            readings_tx.send(plate("C555MM77"))?;
        }
        drop(readings_tx);
        let (events_tx, events_rx) = mpsc::channel();

        run_flow(
            "gate-in".to_string(),
            flow,
            readings_rx,
            events_tx,
            Arc::new(AtomicBool::new(false)),
            None,
        );

        let events: Vec<SessionEvent> = events_rx.try_iter().collect();
        let decided = access_events(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].plate, "A123BC45");
        assert_eq!(store.crossings()?.len(), 1);
        Ok(())
    }

    #[test]
    fn session_starts_degraded_without_store() -> Result<()> {
        let provider = Arc::new(RecordingProvider::default());
        let mut manager = SessionManager::new(
            Arc::new(FailingOpener),
            provider.clone(),
            Arc::new(LogBarrier),
            fast_capture(),
            VotingSettings::default(),
        );

        let (_, rx) = manager.start(stub_spec("gate-out", "B777KK99"))?;
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1))?,
            SessionEvent::StoreUnavailable(_)
        ));
        assert_eq!(provider.acknowledged(), 1);
        assert_eq!(provider.notices(), 0);

        let outcome = wait_for_access(&rx)?;
        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.persistence, crate::access::Persistence::Unavailable);
        manager.stop_all()?;
        Ok(())
    }
}
