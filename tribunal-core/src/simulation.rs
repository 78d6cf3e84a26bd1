/// Synthetic judges with hidden merits, for demos and convergence tests.
///
/// Everything is driven by a seeded `SmallRng`, so a run is reproducible
/// from its seed.
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::audit::kendall_tau;
use crate::engine::RankingEngine;
use crate::error::EngineError;
use crate::event_log::EventLog;
use crate::thurstone::normal_cdf;
use crate::types::{Comparison, ItemId, Outcome};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub items: usize,
    pub seed: u64,
    /// Standard deviation of the hidden merits.
    pub merit_spread: f64,
    /// Standard deviation of each judge's perception error.
    pub judge_noise: f64,
    /// Perceived gaps smaller than this are reported as ties.
    pub tie_margin: f64,
    /// Report a probability instead of a decisive verdict.
    pub soft_verdicts: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            items: 20,
            seed: 42,
            merit_spread: 1.0,
            judge_noise: 0.5,
            tie_margin: 0.05,
            soft_verdicts: false,
        }
    }
}

/// Hidden ground truth plus the noisy judging process.
#[derive(Debug, Clone)]
pub struct SyntheticJudges {
    merits: Vec<(ItemId, f64)>,
    config: SimulationConfig,
}

/// Standard normal sample via Box-Muller.
pub fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-10);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl SyntheticJudges {
    pub fn new(config: SimulationConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let merits = (0..config.items)
            .map(|i| {
                let id = ItemId::new_unchecked(format!("item-{i:03}"));
                (id, standard_normal(&mut rng) * config.merit_spread)
            })
            .collect();
        SyntheticJudges { merits, config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemId> {
        self.merits.iter().map(|(id, _)| id)
    }

    pub fn merit(&self, item: &ItemId) -> Option<f64> {
        self.merits.iter().find(|(id, _)| id == item).map(|(_, m)| *m)
    }

    /// Items by hidden merit, best first.
    pub fn true_ranking(&self) -> Vec<ItemId> {
        let mut sorted = self.merits.clone();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.into_iter().map(|(id, _)| id).collect()
    }

    /// One noisy verdict on `left` vs `right`.
    pub fn judge(&self, left: &ItemId, right: &ItemId, rng: &mut impl Rng) -> Outcome {
        let gap = self.merit(left).unwrap_or(0.0) - self.merit(right).unwrap_or(0.0);
        let perceived = gap + standard_normal(rng) * self.config.judge_noise;
        if perceived.abs() < self.config.tie_margin {
            Outcome::Tie
        } else if self.config.soft_verdicts {
            Outcome::Probability(normal_cdf(perceived / self.config.judge_noise.max(1e-6)))
        } else if perceived > 0.0 {
            Outcome::LeftWins
        } else {
            Outcome::RightWins
        }
    }

    /// Kendall tau between a ranking and the hidden truth.
    pub fn agreement(&self, ranking: &[ItemId]) -> f64 {
        let truth = self.true_ranking();
        // Items missing from `ranking` tie for last and are not counted.
        let position = |id: &ItemId| {
            ranking.iter().position(|r| r == id).map_or(f64::NEG_INFINITY, |p| -(p as f64))
        };
        let observed: Vec<f64> = truth.iter().map(position).collect();
        let expected: Vec<f64> = (0..truth.len()).map(|p| -(p as f64)).collect();
        kendall_tau(&expected, &observed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryPoint {
    pub comparisons: u64,
    pub confidence: f64,
    pub kendall_tau: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub comparisons: u64,
    pub confident: bool,
    pub final_kendall_tau: f64,
    pub trajectory: Vec<TrajectoryPoint>,
}

/// Register every synthetic item, then follow the engine's recommended
/// pairs until it is confident or `budget` comparisons have been made.
pub fn run_sequential<L: EventLog>(
    engine: &RankingEngine<L>,
    judges: &SyntheticJudges,
    budget: u64,
    sample_every: u64,
) -> Result<SimulationReport, EngineError> {
    let mut rng = SmallRng::seed_from_u64(judges.config.seed.wrapping_add(1));
    for item in judges.items() {
        engine.register_item(item.as_str())?;
    }

    let mut trajectory = Vec::new();
    let mut comparisons = 0u64;
    let mut next = engine.next_pair();
    while let Some((left, right)) = next {
        if comparisons >= budget {
            break;
        }
        let outcome = judges.judge(&left, &right, &mut rng);
        let ack = engine.submit_comparison(Comparison { left, right, outcome, judge: "synthetic".into() })?;
        comparisons += 1;
        if sample_every > 0 && comparisons % sample_every == 0 {
            trajectory.push(trajectory_point(engine, judges, comparisons));
        }
        next = ack.next_pair;
    }

    let last = trajectory_point(engine, judges, comparisons);
    Ok(SimulationReport {
        comparisons,
        confident: engine.is_ranking_confident(),
        final_kendall_tau: last.kendall_tau,
        trajectory,
    })
}

pub fn trajectory_point<L: EventLog>(
    engine: &RankingEngine<L>,
    judges: &SyntheticJudges,
    comparisons: u64,
) -> TrajectoryPoint {
    let report = engine.ranking(None);
    TrajectoryPoint {
        comparisons,
        confidence: report.ranking.confidence,
        kendall_tau: judges.agreement(&report.ranking.order()),
    }
}
