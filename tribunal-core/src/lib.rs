/// tribunal-core: crash-safe online ranking from pairwise judgments.
///
/// Judges submit "left beats right" style verdicts. Each accepted verdict is
/// appended to a durable event log, then folded into per-item Gaussian
/// beliefs over latent merit. The engine recommends which pair to judge next
/// and reports when the ranking has settled. The belief state is a pure
/// function of the log, so a restart rebuilds it exactly from the latest
/// checkpoint plus the events after it.
///
/// # Quick start
///
/// ```rust
/// use std::sync::Arc;
/// use tribunal_core::{EngineConfig, MemoryLog, RankingEngine, Submission};
///
/// let engine = RankingEngine::open(Arc::new(MemoryLog::new()), EngineConfig::default()).unwrap();
///
/// let ack = engine
///     .submit(&Submission {
///         left: "essay-a".into(),
///         right: "essay-b".into(),
///         outcome: "left".into(),
///         judge: "reviewer-1".into(),
///     })
///     .unwrap();
/// assert_eq!(ack.sequence, 1);
///
/// for r in &engine.ranking(None).ranking.items {
///     println!("{}: {:.3} [{:.3}, {:.3}]", r.item, r.mean, r.lower_bound, r.upper_bound);
/// }
/// ```

pub mod audit;
pub mod belief;
pub mod bradley_terry;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod file_log;
pub mod outcome;
pub mod pairing;
pub mod simulation;
pub mod thurstone;
pub mod types;

// Re-export primary public API at crate root.
pub use audit::{cross_check, kendall_tau, CrossCheck};
pub use belief::{BeliefState, ItemBelief};
pub use engine::{
    ConvergencePoint, EngineConfig, EngineStatus, Phase, RankingEngine, RankingReport,
    RecoveryReport,
};
pub use error::{BeliefError, DurabilityError, EngineError, InvalidEvent, WalError};
pub use event_log::{EventLog, EventStream, LogStats, MemoryLog};
pub use file_log::{FileLog, FileLogOptions};
pub use outcome::{parse_outcome, parse_outcome_with};
pub use pairing::{PairPolicy, PairScorer, PolicyConfig, Strategy};
pub use thurstone::ModelConfig;
pub use types::{
    Acknowledgement, Comparison, Event, EventPayload, ItemId, Outcome, Pair, RankedItem,
    RankingSnapshot, Submission,
};
