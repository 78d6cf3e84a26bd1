/// Active pair selection.
///
/// Every candidate pair within a window of neighbours in mean order is scored
/// by a [`PairScorer`]; the highest score wins. Selection is deterministic:
/// equal scores fall back to the pair compared least recently, then to the
/// lexicographically lowest `(min id, max id)`.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::belief::{BeliefState, ItemBelief};
use crate::constants::{DEFAULT_CONFIDENCE_THRESHOLD, OPPONENT_WINDOW_SIZE};
use crate::thurstone::{self, Gaussian, ModelConfig};
use crate::types::{ItemId, Outcome, Pair};

/// Built-in pair scoring strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Probability that the pair's current order is wrong.
    Overlap,
    /// Expected reduction in total posterior variance from one more comparison.
    VarianceReduction,
}

/// Scores how useful comparing two items would be. Higher is better.
pub trait PairScorer: Send + Sync {
    fn score(&self, a: &Gaussian, b: &Gaussian) -> f64;
}

/// Scores a pair by the posterior mass on the "wrong" side of its current order.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapScorer;

impl PairScorer for OverlapScorer {
    fn score(&self, a: &Gaussian, b: &Gaussian) -> f64 {
        let spread = (a.variance + b.variance).sqrt();
        thurstone::normal_cdf(-(a.mean - b.mean).abs() / spread)
    }
}

/// Scores a pair by expected variance reduction under the predictive
/// distribution of the next judgment.
#[derive(Debug, Clone)]
pub struct VarianceReductionScorer {
    model: ModelConfig,
}

impl VarianceReductionScorer {
    pub fn new(model: ModelConfig) -> Self {
        VarianceReductionScorer { model }
    }
}

impl PairScorer for VarianceReductionScorer {
    fn score(&self, a: &Gaussian, b: &Gaussian) -> f64 {
        calculate_info_gain(&self.model, a, b)
    }
}

/// Expected drop in `var(a) + var(b)` after one more comparison of `a` and `b`.
pub fn calculate_info_gain(model: &ModelConfig, a: &Gaussian, b: &Gaussian) -> f64 {
    let (win, tie, loss) = thurstone::predict(model, a, b);
    let before = a.variance + b.variance;

    [(Outcome::LeftWins, win), (Outcome::Tie, tie), (Outcome::RightWins, loss)]
        .into_iter()
        .map(|(outcome, p)| match thurstone::update(model, a, b, outcome) {
            Ok((na, nb)) => p * (before - na.variance - nb.variance),
            Err(_) => 0.0,
        })
        .sum()
}

/// Stopping criterion and candidate window for pair selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub strategy: Strategy,
    /// Every adjacent pair must reach this P(correct order) to stop.
    pub confidence_threshold: f64,
    /// Stop after this many comparisons regardless of confidence.
    pub max_comparisons: Option<u64>,
    /// Each item is paired only with its `window_size` nearest neighbours in mean order.
    pub window_size: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            strategy: Strategy::VarianceReduction,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_comparisons: None,
            window_size: OPPONENT_WINDOW_SIZE,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.confidence_threshold > 0.5 && self.confidence_threshold < 1.0) {
            return Err(format!(
                "confidence_threshold must be in (0.5, 1.0), got {}",
                self.confidence_threshold
            ));
        }
        if self.window_size == 0 {
            return Err("window_size must be at least 1".to_string());
        }
        Ok(())
    }
}

pub struct PairPolicy {
    config: PolicyConfig,
    scorer: Box<dyn PairScorer>,
}

impl PairPolicy {
    /// Policy using the scorer named by `config.strategy`.
    pub fn new(config: PolicyConfig, model: &ModelConfig) -> Self {
        let scorer: Box<dyn PairScorer> = match config.strategy {
            Strategy::Overlap => Box::new(OverlapScorer),
            Strategy::VarianceReduction => Box::new(VarianceReductionScorer::new(model.clone())),
        };
        PairPolicy { config, scorer }
    }

    /// Policy with a caller-provided scorer; `config.strategy` is ignored.
    pub fn with_scorer(config: PolicyConfig, scorer: Box<dyn PairScorer>) -> Self {
        PairPolicy { config, scorer }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// True when every adjacent pair in the ranking is separated with at
    /// least `confidence_threshold` probability, or the comparison budget is spent.
    pub fn is_ranking_confident(&self, state: &BeliefState) -> bool {
        if self.config.max_comparisons.is_some_and(|max| state.comparisons() >= max) {
            return true;
        }
        state.current_ranking().min_separation >= self.config.confidence_threshold
    }

    /// The most informative pair to compare next, lower ID first.
    ///
    /// `None` once the ranking is confident or fewer than two items are active.
    pub fn select_next_pair(&self, state: &BeliefState) -> Option<Pair> {
        if self.is_ranking_confident(state) {
            return None;
        }

        let mut sorted: Vec<(&ItemId, &ItemBelief)> = state.active_items().collect();
        if sorted.len() < 2 {
            return None;
        }
        sorted.sort_by(|(ia, a), (ib, b)| b.mean.total_cmp(&a.mean).then_with(|| ia.cmp(ib)));

        let window = self.config.window_size;
        let mut best: Option<Candidate> = None;

        for i in 0..sorted.len() {
            let (id_i, belief_i) = sorted[i];
            let end = i.saturating_add(window).min(sorted.len() - 1);
            for &(id_j, belief_j) in &sorted[i + 1..=end] {
                let score = self.scorer.score(&belief_i.gaussian(), &belief_j.gaussian());
                let (low, high) = if id_i <= id_j { (id_i, id_j) } else { (id_j, id_i) };
                let candidate = Candidate {
                    score: if score.is_nan() { f64::NEG_INFINITY } else { score },
                    last_compared: state.pair_stats(low, high).map(|s| s.last_sequence),
                    low,
                    high,
                };
                if best.as_ref().is_none_or(|b| candidate.beats(b)) {
                    best = Some(candidate);
                }
            }
        }

        best.map(|c| (c.low.clone(), c.high.clone()))
    }
}

struct Candidate<'a> {
    score: f64,
    /// `None` for a pair never compared.
    last_compared: Option<u64>,
    low: &'a ItemId,
    high: &'a ItemId,
}

impl Candidate<'_> {
    fn beats(&self, other: &Candidate<'_>) -> bool {
        let ordering = self
            .score
            .total_cmp(&other.score)
            // Older (or never) compared pairs win ties; `None < Some`.
            .then_with(|| other.last_compared.cmp(&self.last_compared))
            .then_with(|| (other.low, other.high).cmp(&(self.low, self.high)));
        ordering == Ordering::Greater
    }
}
