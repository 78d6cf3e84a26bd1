use std::sync::Arc;
use std::thread;

use tribunal_core::simulation::{run_sequential, SimulationConfig, SyntheticJudges};
use tribunal_core::{
    BeliefState, DurabilityError, EngineConfig, EngineError, Event, EventLog, EventPayload,
    EventStream, InvalidEvent, ItemId, LogStats, MemoryLog, Outcome, Phase, PolicyConfig,
    RankingEngine, Submission, WalError,
};

fn submission(left: &str, right: &str, outcome: &str) -> Submission {
    Submission {
        left: left.into(),
        right: right.into(),
        outcome: outcome.into(),
        judge: "panel".into(),
    }
}

fn memory_engine() -> RankingEngine<MemoryLog> {
    RankingEngine::open(Arc::new(MemoryLog::new()), EngineConfig::default()).unwrap()
}

fn id(s: &str) -> ItemId {
    ItemId::parse(s).unwrap()
}

#[test]
fn transitive_wins_rank_a_b_c() {
    let engine = memory_engine();
    engine.submit(&submission("A", "B", "left")).unwrap();
    engine.submit(&submission("B", "C", "left")).unwrap();
    engine.submit(&submission("A", "C", "left")).unwrap();

    let ranking = engine.ranking(None).ranking;
    assert_eq!(ranking.order(), vec![id("A"), id("B"), id("C")]);
    assert!(ranking.items.windows(2).all(|w| w[0].mean > w[1].mean));
}

#[test]
fn first_mention_registers_items() {
    let engine = memory_engine();
    engine.submit(&submission("fresh-1", "fresh-2", "tie")).unwrap();
    let state = engine.snapshot();
    assert!(state.contains(&id("fresh-1")));
    assert!(state.contains(&id("fresh-2")));
    assert_eq!(engine.status().items, 2);
}

#[test]
fn unrecognized_outcome_gets_no_sequence() {
    let engine = memory_engine();
    engine.submit(&submission("a", "b", "left")).unwrap();
    let err = engine.submit(&submission("a", "b", "maybe")).unwrap_err();
    assert!(matches!(err, EngineError::Invalid(InvalidEvent::UnrecognizedOutcome(_))));
    assert_eq!(engine.log().last_sequence(), 1);
    assert_eq!(engine.submit(&submission("a", "b", "right")).unwrap().sequence, 2);
}

#[test]
fn identical_logs_give_identical_states() {
    let runs: Vec<_> = (0..2)
        .map(|_| {
            let engine = memory_engine();
            for (l, r, o) in [("a", "b", "left"), ("b", "c", "0.3"), ("c", "a", "tie"), ("a", "d", "E")] {
                engine.submit(&submission(l, r, o)).unwrap();
            }
            engine.snapshot()
        })
        .collect();
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn replaying_applied_events_changes_nothing() {
    let engine = memory_engine();
    for (l, r, o) in [("a", "b", "left"), ("b", "c", "B"), ("a", "c", "tie")] {
        engine.submit(&submission(l, r, o)).unwrap();
    }
    let mut state = (*engine.snapshot()).clone();
    let before = state.clone();
    for event in engine.log().events() {
        assert!(!state.apply(&event).unwrap());
    }
    assert_eq!(state, before);
}

#[test]
fn failed_append_leaves_no_trace() {
    let engine = memory_engine();
    engine.submit(&submission("a", "b", "left")).unwrap();
    let before = engine.snapshot();

    engine.log().fail_next_appends(1);
    let err = engine.submit(&submission("b", "c", "left")).unwrap_err();
    assert!(matches!(err, EngineError::Durability(DurabilityError::Simulated)));
    assert!(err.is_retryable());
    assert_eq!(*engine.snapshot(), *before);
    assert!(!engine.snapshot().contains(&id("c")));

    let ack = engine.submit(&submission("b", "c", "left")).unwrap();
    assert_eq!(ack.sequence, 2);
}

/// Records whatever it is given, but corrupts comparison outcomes on the way in.
struct CorruptingLog(MemoryLog);

impl EventLog for CorruptingLog {
    fn append(&self, payload: EventPayload) -> Result<Event, DurabilityError> {
        let payload = match payload {
            EventPayload::Comparison(mut c) => {
                c.outcome = Outcome::Probability(f64::NAN);
                EventPayload::Comparison(c)
            }
            other => other,
        };
        self.0.append(payload)
    }

    fn append_checkpoint(&self, state: &BeliefState, sequence: u64) -> Result<(), WalError> {
        self.0.append_checkpoint(state, sequence)
    }

    fn replay(&self, from: u64) -> Result<EventStream<'_>, WalError> {
        self.0.replay(from)
    }

    fn latest_checkpoint(&self) -> Result<Option<(BeliefState, u64)>, WalError> {
        self.0.latest_checkpoint()
    }

    fn last_sequence(&self) -> u64 {
        self.0.last_sequence()
    }

    fn stats(&self) -> LogStats {
        self.0.stats()
    }
}

#[test]
fn unappliable_logged_event_halts_engine() {
    let engine = RankingEngine::open(Arc::new(CorruptingLog(MemoryLog::new())), EngineConfig::default()).unwrap();
    engine.register_item("a").unwrap();

    let err = engine.submit(&submission("a", "b", "left")).unwrap_err();
    assert!(matches!(err, EngineError::Fatal { sequence: 2, .. }));
    let status = engine.status();
    assert_eq!(status.phase, Phase::Halted);
    assert!(status.halted_reason.is_some());
    assert_eq!(status.applied_sequence, 1);

    let err = engine.submit(&submission("a", "c", "left")).unwrap_err();
    assert!(matches!(err, EngineError::Halted(_)));
    assert!(matches!(engine.register_item("z").unwrap_err(), EngineError::Halted(_)));
    // Reads keep working on the last good state.
    assert_eq!(engine.ranking(None).ranking.sequence, 1);
}

#[test]
fn recovery_halts_on_unappliable_event() {
    let log = Arc::new(MemoryLog::new());
    log.append(EventPayload::RegisterItem { item: id("a") }).unwrap();
    log.append(EventPayload::Comparison(tribunal_core::Comparison {
        left: id("a"),
        right: id("b"),
        outcome: Outcome::Probability(1.5),
        judge: "x".into(),
    }))
    .unwrap();

    let engine = RankingEngine::new(log, EngineConfig::default()).unwrap();
    let err = engine.recover().unwrap_err();
    assert!(matches!(err, EngineError::Fatal { sequence: 2, .. }));
    assert_eq!(engine.status().phase, Phase::Halted);
}

#[test]
fn concurrent_submitters_get_unique_gapless_sequences() {
    let engine = Arc::new(memory_engine());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        let left = format!("t{t}-{}", i % 5);
                        let right = format!("t{t}-{}", (i + 1) % 5);
                        engine.submit(&submission(&left, &right, "left")).unwrap().sequence
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut sequences: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=100).collect::<Vec<_>>());

    let state = engine.snapshot();
    assert_eq!(state.sequence(), 100);
    assert_eq!(state.comparisons(), 100);
    let logged: Vec<u64> = engine.log().events().iter().map(|e| e.sequence).collect();
    assert_eq!(logged, (1..=100).collect::<Vec<_>>());
}

#[test]
fn confidence_rises_with_evidence() {
    let config = EngineConfig {
        policy: PolicyConfig { confidence_threshold: 0.999, ..PolicyConfig::default() },
        ..EngineConfig::default()
    };

    let mut early = 0.0;
    let mut late = 0.0;
    let seeds = [11, 12, 13, 14, 15];
    for seed in seeds {
        let judges = SyntheticJudges::new(SimulationConfig { items: 6, seed, ..SimulationConfig::default() });
        let engine = RankingEngine::open(Arc::new(MemoryLog::new()), config.clone()).unwrap();
        let report = run_sequential(&engine, &judges, 200, 20).unwrap();
        let first = report.trajectory.first().unwrap();
        let last = report.trajectory.last().unwrap();
        early += first.confidence;
        late += last.confidence;
    }
    assert!(late / seeds.len() as f64 > early / seeds.len() as f64);
}
