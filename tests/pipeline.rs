use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plate_gate::{
    AccessController, Candidate, DecisionFlow, DecisionProvider, Direction, Frame,
    InferenceWorker, LogBarrier, NewEmployee, PlateAggregator, Reading, Region, RosterStore,
    SessionEvent, SqliteRosterStore, StubDetector, Verdict, VotingSettings,
};

struct ScriptedOperator {
    answer: Verdict,
    prompts: AtomicUsize,
}

impl ScriptedOperator {
    fn new(answer: Verdict) -> Arc<Self> {
        Arc::new(Self {
            answer,
            prompts: AtomicUsize::new(0),
        })
    }

    fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl DecisionProvider for ScriptedOperator {
    fn confirm(&self, _plate: &str, _direction: Direction) -> Verdict {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

fn blank_frame() -> Result<Frame> {
    Frame::new(vec![0u8; 16 * 8 * 3], 16, 8, 3)
}

/// Runs `count` frames through a worker whose detector always sees `plate`
/// (plus some noise), one frame at a time.
fn recognize_frames(plate: &str, count: usize) -> Result<Vec<Reading>> {
    let detector = StubDetector::fixed(vec![
        Candidate::new("TAXI", Region::new(0.0, 0.0, 200.0, 40.0)),
        Candidate::new(plate, Region::new(10.0, 10.0, 130.0, 40.0)),
        Candidate::new("A123BC", Region::new(0.0, 0.0, 60.0, 20.0)),
    ]);
    let (mut worker, results) = InferenceWorker::spawn(Box::new(detector))?;
    let mut readings = Vec::with_capacity(count);
    for _ in 0..count {
        worker.submit(blank_frame()?)?;
        readings.push(results.recv_timeout(Duration::from_secs(5))?);
    }
    worker.stop()?;
    Ok(readings)
}

fn flow_for(
    db_path: &str,
    operator: Arc<ScriptedOperator>,
    direction: Direction,
) -> Result<DecisionFlow> {
    let store = SqliteRosterStore::open(db_path)?;
    let controller = AccessController::new(Some(Box::new(store)), operator, Arc::new(LogBarrier));
    Ok(DecisionFlow::new(
        PlateAggregator::new(VotingSettings::default()),
        controller,
        direction,
    ))
}

fn count_decisions(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::DecisionChanged(_)))
        .count()
}

#[test]
fn registered_employee_passes_without_prompt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("gate.db").to_string_lossy().into_owned();
    let ivanov = SqliteRosterStore::open(&db_path)?
        .add_employee(&NewEmployee::new("Ivanov", "Logistics", "A123BC45")?)?;

    let operator = ScriptedOperator::new(Verdict::Deny);
    let mut flow = flow_for(&db_path, operator.clone(), Direction::Entry)?;

    let readings = recognize_frames("A123BC45", 11)?;
    assert!(readings.iter().all(|r| r.plate() == Some("A123BC45")));

    let events: Vec<SessionEvent> = readings
        .into_iter()
        .flat_map(|reading| flow.handle(reading))
        .collect();

    assert_eq!(count_decisions(&events), 1);
    assert!(events.contains(&SessionEvent::DecisionChanged(Reading::Plate(
        "A123BC45".to_string()
    ))));
    assert_eq!(operator.prompts(), 0);

    let crossings = SqliteRosterStore::open(&db_path)?.list_crossings()?;
    assert_eq!(crossings.len(), 1);
    assert_eq!(crossings[0].plate, "A123BC45");
    assert_eq!(crossings[0].name.as_deref(), Some("Ivanov"));
    assert_eq!(crossings[0].direction, Direction::Entry);

    let outcome = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Access(outcome) => Some(outcome),
            _ => None,
        })
        .expect("access outcome");
    assert_eq!(outcome.employee_id, Some(ivanov));
    assert_eq!(outcome.verdict, Verdict::Allow);
    Ok(())
}

#[test]
fn unknown_vehicle_denied_by_operator_is_not_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("gate.db").to_string_lossy().into_owned();

    let operator = ScriptedOperator::new(Verdict::Deny);
    let mut flow = flow_for(&db_path, operator.clone(), Direction::Exit)?;

    let events: Vec<SessionEvent> = recognize_frames("B777KK99", 11)?
        .into_iter()
        .flat_map(|reading| flow.handle(reading))
        .collect();

    assert_eq!(count_decisions(&events), 1);
    assert_eq!(operator.prompts(), 1);
    let verdicts: Vec<Verdict> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Access(outcome) => Some(outcome.verdict),
            _ => None,
        })
        .collect();
    assert_eq!(verdicts, vec![Verdict::Deny]);
    assert!(SqliteRosterStore::open(&db_path)?.list_crossings()?.is_empty());
    Ok(())
}

#[test]
fn unknown_vehicle_allowed_by_operator_is_recorded_without_employee() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("gate.db").to_string_lossy().into_owned();

    let operator = ScriptedOperator::new(Verdict::Allow);
    let mut flow = flow_for(&db_path, operator.clone(), Direction::Entry)?;
    for _ in 0..11 {
        flow.handle(Reading::Plate("B777KK99".to_string()));
    }

    assert_eq!(operator.prompts(), 1);
    let crossings = SqliteRosterStore::open(&db_path)?.list_crossings()?;
    assert_eq!(crossings.len(), 1);
    assert_eq!(crossings[0].name, None);
    Ok(())
}

#[test]
fn noisy_window_does_not_flip_stable_decision() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("gate.db").to_string_lossy().into_owned();
    let operator = ScriptedOperator::new(Verdict::Allow);
    let mut flow = flow_for(&db_path, operator.clone(), Direction::Entry)?;

    for _ in 0..11 {
        flow.handle(Reading::Plate("A123BC45".to_string()));
    }
    // 5 of the held plate, 6 of a contender: 6/11 misses quorum on its own,
    // and amplification pushes the held plate over it instead.
    let mut events = Vec::new();
    for i in 0..11 {
        let text = if i % 2 == 0 { "C555MM77" } else { "A123BC45" };
        events.extend(flow.handle(Reading::Plate(text.to_string())));
    }
    assert_eq!(count_decisions(&events), 0);
    assert_eq!(
        flow.decided(),
        Some(&Reading::Plate("A123BC45".to_string()))
    );
    assert_eq!(operator.prompts(), 1);
    Ok(())
}
