/// Ranking engine orchestrator.
///
/// Each submission goes through validate, append, apply and publish while
/// holding the single writer lock. Readers never take that lock: they clone
/// the `Arc` of the last published belief state, so a slow fsync never blocks
/// a ranking query and a query never sees an event that is logged but not
/// yet applied.
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::belief::BeliefState;
use crate::constants::{DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_HISTORY_INTERVAL, MAX_HISTORY_POINTS};
use crate::error::{BeliefError, EngineError, InvalidEvent};
use crate::event_log::{EventLog, EventStream};
use crate::outcome::{parse_outcome, validate_outcome};
use crate::pairing::{PairPolicy, PolicyConfig};
use crate::thurstone::ModelConfig;
use crate::types::{
    check_judge, Acknowledgement, Comparison, Event, EventPayload, ItemId, Pair, RankingSnapshot,
    Submission,
};

/// Configuration for the ranking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub policy: PolicyConfig,
    /// Write a checkpoint every this many applied events. 0 disables automatic checkpoints.
    pub checkpoint_interval: u64,
    /// Record a convergence point every this many events. 0 disables history.
    pub history_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model: ModelConfig::default(),
            policy: PolicyConfig::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            history_interval: DEFAULT_HISTORY_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.model.validate().map_err(EngineError::Config)?;
        self.policy.validate().map_err(EngineError::Config)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Loading the checkpoint and replaying the log. Submissions are refused.
    Recovering,
    Ready,
    /// A logged event could not be applied. Submissions are refused until restart.
    Halted,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: Phase,
    pub applied_sequence: u64,
    pub items: usize,
    pub active_items: usize,
    pub comparisons: u64,
    pub last_checkpoint: Option<u64>,
    pub halted_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Sequence of the checkpoint recovery started from, if any was usable.
    pub checkpoint_sequence: Option<u64>,
    /// Events replayed on top of the checkpoint.
    pub replayed: u64,
    pub applied_sequence: u64,
}

/// Ranking confidence at one point in the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePoint {
    pub sequence: u64,
    pub comparisons: u64,
    pub confidence: f64,
    pub min_separation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingReport {
    #[serde(flatten)]
    pub ranking: RankingSnapshot,
    /// Whether pair selection considers the ranking settled.
    pub confident: bool,
    pub comparisons: u64,
}

struct Writer {
    state: BeliefState,
    /// Applied events since the last successful checkpoint.
    since_checkpoint: u64,
}

struct PhaseState {
    phase: Phase,
    halted_reason: Option<String>,
}

pub struct RankingEngine<L: EventLog> {
    log: Arc<L>,
    config: EngineConfig,
    policy: PairPolicy,
    writer: Mutex<Writer>,
    published: RwLock<Arc<BeliefState>>,
    phase: RwLock<PhaseState>,
    history: RwLock<VecDeque<ConvergencePoint>>,
}

impl<L: EventLog> RankingEngine<L> {
    /// Create an engine in the `Recovering` phase. Call [`recover`](Self::recover)
    /// before submitting.
    pub fn new(log: Arc<L>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let state = BeliefState::new(config.model.clone());
        let policy = PairPolicy::new(config.policy.clone(), &config.model);
        Ok(RankingEngine {
            log,
            policy,
            published: RwLock::new(Arc::new(state.clone())),
            writer: Mutex::new(Writer { state, since_checkpoint: 0 }),
            phase: RwLock::new(PhaseState { phase: Phase::Recovering, halted_reason: None }),
            history: RwLock::new(VecDeque::new()),
            config,
        })
    }

    /// Create an engine with a caller-provided pair policy.
    pub fn with_policy(log: Arc<L>, config: EngineConfig, policy: PairPolicy) -> Result<Self, EngineError> {
        let mut engine = Self::new(log, config)?;
        engine.policy = policy;
        Ok(engine)
    }

    /// Create an engine and recover it from the log.
    pub fn open(log: Arc<L>, config: EngineConfig) -> Result<Self, EngineError> {
        let engine = Self::new(log, config)?;
        engine.recover()?;
        Ok(engine)
    }

    /// Rebuild the belief state from the newest usable checkpoint plus the
    /// rest of the log, then start accepting submissions.
    pub fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut writer = self.writer.lock();
        self.set_phase(Phase::Recovering, None);
        self.history.write().clear();

        let fresh = || BeliefState::new(self.config.model.clone());
        let (mut state, checkpoint_sequence) = match self.log.latest_checkpoint()? {
            Some((state, sequence)) if state.model() == &self.config.model => (state, Some(sequence)),
            Some((_, sequence)) => {
                warn!("Ignoring checkpoint {sequence}: model parameters have changed, replaying full log");
                (fresh(), None)
            }
            None => (fresh(), None),
        };

        let mut replayed = 0u64;
        for event in self.log.replay(state.sequence())? {
            let event = event?;
            if let Err(source) = state.apply(&event) {
                return Err(self.halt(event.sequence, source));
            }
            replayed += 1;
            self.sample_history(&state);
        }

        info!(
            "Recovered {} events (checkpoint {:?}, replayed {}), {} items",
            state.sequence(),
            checkpoint_sequence,
            replayed,
            state.num_items()
        );

        let report =
            RecoveryReport { checkpoint_sequence, replayed, applied_sequence: state.sequence() };
        *self.published.write() = Arc::new(state.clone());
        *writer = Writer { state, since_checkpoint: replayed };
        self.set_phase(Phase::Ready, None);
        Ok(report)
    }

    /// Validate, log and apply one raw submission.
    pub fn submit(&self, submission: &Submission) -> Result<Acknowledgement, EngineError> {
        self.ensure_ready()?;
        let comparison = Comparison {
            left: ItemId::parse(&submission.left)?,
            right: ItemId::parse(&submission.right)?,
            outcome: parse_outcome(&submission.outcome)?,
            judge: submission.judge.clone(),
        };
        self.submit_comparison(comparison)
    }

    /// Log and apply an already-typed comparison.
    pub fn submit_comparison(&self, comparison: Comparison) -> Result<Acknowledgement, EngineError> {
        if comparison.left == comparison.right {
            return Err(InvalidEvent::SelfComparison(comparison.left).into());
        }
        validate_outcome(comparison.outcome)?;
        check_judge(&comparison.judge)?;

        let mut writer = self.writer.lock();
        self.ensure_ready()?;
        for item in [&comparison.left, &comparison.right] {
            if writer.state.item(item).is_some_and(|b| b.retired) {
                return Err(InvalidEvent::RetiredItem(item.clone()).into());
            }
        }

        let event = self.commit(&mut writer, EventPayload::Comparison(comparison))?;
        Ok(Acknowledgement {
            sequence: event.sequence,
            next_pair: self.policy.select_next_pair(&writer.state),
        })
    }

    /// Log an item registration. Registering a retired item reinstates it.
    pub fn register_item(&self, raw: &str) -> Result<u64, EngineError> {
        let item = ItemId::parse(raw)?;
        let mut writer = self.writer.lock();
        self.ensure_ready()?;
        let event = self.commit(&mut writer, EventPayload::RegisterItem { item })?;
        Ok(event.sequence)
    }

    /// Log an item retirement. The item keeps its belief but leaves the ranking.
    pub fn retire_item(&self, raw: &str) -> Result<u64, EngineError> {
        let item = ItemId::parse(raw)?;
        let mut writer = self.writer.lock();
        self.ensure_ready()?;
        match writer.state.item(&item) {
            None => return Err(InvalidEvent::UnknownItem(item).into()),
            Some(belief) if belief.retired => return Err(InvalidEvent::RetiredItem(item).into()),
            Some(_) => {}
        }
        let event = self.commit(&mut writer, EventPayload::RetireItem { item })?;
        Ok(event.sequence)
    }

    /// Append, apply, publish. Caller holds the writer lock.
    fn commit(&self, writer: &mut Writer, payload: EventPayload) -> Result<Event, EngineError> {
        let event = self.log.append(payload)?;
        if let Err(source) = writer.state.apply(&event) {
            return Err(self.halt(event.sequence, source));
        }
        debug!("Applied event {}", event.sequence);

        *self.published.write() = Arc::new(writer.state.clone());
        self.sample_history(&writer.state);

        writer.since_checkpoint += 1;
        let interval = self.config.checkpoint_interval;
        if interval > 0 && writer.since_checkpoint >= interval {
            match self.log.append_checkpoint(&writer.state, event.sequence) {
                Ok(()) => writer.since_checkpoint = 0,
                Err(e) => warn!("Automatic checkpoint at {} failed: {e}", event.sequence),
            }
        }
        Ok(event)
    }

    fn halt(&self, sequence: u64, source: BeliefError) -> EngineError {
        error!("Halting: event {sequence} is logged but cannot be applied: {source}");
        self.set_phase(Phase::Halted, Some(format!("event {sequence}: {source}")));
        EngineError::Fatal { sequence, source }
    }

    fn set_phase(&self, phase: Phase, halted_reason: Option<String>) {
        *self.phase.write() = PhaseState { phase, halted_reason };
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        let phase = self.phase.read();
        match phase.phase {
            Phase::Ready => Ok(()),
            Phase::Recovering => Err(EngineError::NotReady),
            Phase::Halted => Err(EngineError::Halted(phase.halted_reason.clone().unwrap_or_default())),
        }
    }

    fn sample_history(&self, state: &BeliefState) {
        let interval = self.config.history_interval;
        if interval == 0 || state.sequence() % interval != 0 {
            return;
        }
        let ranking = state.current_ranking();
        let mut history = self.history.write();
        if history.len() >= MAX_HISTORY_POINTS {
            history.pop_front();
        }
        history.push_back(ConvergencePoint {
            sequence: state.sequence(),
            comparisons: state.comparisons(),
            confidence: ranking.confidence,
            min_separation: ranking.min_separation,
        });
    }

    /// Write a checkpoint of the current state immediately.
    pub fn checkpoint_now(&self) -> Result<u64, EngineError> {
        let mut writer = self.writer.lock();
        self.ensure_ready()?;
        let sequence = writer.state.sequence();
        self.log.append_checkpoint(&writer.state, sequence)?;
        writer.since_checkpoint = 0;
        Ok(sequence)
    }

    /// The last published belief state.
    pub fn snapshot(&self) -> Arc<BeliefState> {
        self.published.read().clone()
    }

    /// Current ranking, optionally restricted to `subset`. Confidence figures
    /// always describe the full ranking.
    pub fn ranking(&self, subset: Option<&[ItemId]>) -> RankingReport {
        let state = self.snapshot();
        let mut ranking = state.current_ranking();
        if let Some(subset) = subset {
            ranking.items.retain(|r| subset.contains(&r.item));
        }
        RankingReport {
            ranking,
            confident: self.policy.is_ranking_confident(&state),
            comparisons: state.comparisons(),
        }
    }

    pub fn next_pair(&self) -> Option<Pair> {
        self.policy.select_next_pair(&self.snapshot())
    }

    pub fn is_ranking_confident(&self) -> bool {
        self.policy.is_ranking_confident(&self.snapshot())
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.snapshot();
        let last_checkpoint = self.log.stats().checkpoints.last().copied();
        let phase = self.phase.read();
        EngineStatus {
            phase: phase.phase,
            applied_sequence: state.sequence(),
            items: state.num_items(),
            active_items: state.active_items().count(),
            comparisons: state.comparisons(),
            last_checkpoint,
            halted_reason: phase.halted_reason.clone(),
        }
    }

    /// Logged events after `from`, for audit.
    pub fn audit(&self, from: u64) -> Result<EventStream<'_>, EngineError> {
        Ok(self.log.replay(from)?)
    }

    /// Convergence points sampled since the last recovery.
    pub fn history(&self) -> Vec<ConvergencePoint> {
        self.history.read().iter().copied().collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }
}
