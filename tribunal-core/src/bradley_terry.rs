/// Batch Bradley-Terry maximum likelihood fit over the full event log.
///
/// Used only to audit the online posterior: the fit is order-independent,
/// so a large disagreement with the streaming estimate points at a bug or a
/// pathological event order. Ties and soft outcomes contribute fractional
/// wins. A ghost player weakly tied with everyone keeps items with no wins
/// (or no losses) at a finite strength.
use std::collections::BTreeMap;

const CONVERGENCE_THRESHOLD: f64 = 1e-6;

/// `(left index, right index, left score)` with score in `[0, 1]`.
pub(crate) type IndexedComparison = (usize, usize, f64);

pub struct BradleyTerry {
    /// Number of real items (excluding ghost).
    num_items: usize,
    /// wins[i][j] = fractional wins of i over j. Index `num_items` is the ghost.
    wins: Vec<BTreeMap<usize, f64>>,
    total_wins: Vec<f64>,
    /// Strengths, geometric mean 1.
    strengths: Vec<f64>,
}

impl BradleyTerry {
    pub(crate) fn new(num_items: usize, results: &[IndexedComparison], regularization: f64) -> Self {
        let ghost = num_items;
        let total = num_items + 1;
        let mut wins: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); total];

        for &(l, r, score) in results {
            if l >= num_items || r >= num_items || l == r {
                continue;
            }
            *wins[l].entry(r).or_insert(0.0) += score;
            *wins[r].entry(l).or_insert(0.0) += 1.0 - score;
        }
        if regularization > 0.0 {
            for i in 0..num_items {
                *wins[i].entry(ghost).or_insert(0.0) += regularization;
                *wins[ghost].entry(i).or_insert(0.0) += regularization;
            }
        }

        let total_wins = wins.iter().map(|row| row.values().sum()).collect();
        BradleyTerry { num_items, wins, total_wins, strengths: vec![1.0; total] }
    }

    fn wins_of(&self, i: usize, j: usize) -> f64 {
        self.wins[i].get(&j).copied().unwrap_or(0.0)
    }

    /// One minorization-maximization step (Hunter 2004).
    fn step(&mut self) {
        let next: Vec<f64> = (0..self.strengths.len())
            .map(|i| {
                if self.total_wins[i] == 0.0 {
                    return 0.0;
                }
                let s_i = self.strengths[i];
                let denominator: f64 = self.wins[i]
                    .iter()
                    .map(|(&j, &w_ij)| {
                        let games = w_ij + self.wins_of(j, i);
                        let s = s_i + self.strengths[j];
                        if games > 0.0 && s > 0.0 { games / s } else { 0.0 }
                    })
                    .sum();
                if denominator > 0.0 { self.total_wins[i] / denominator } else { s_i }
            })
            .collect();
        self.strengths = next;
        self.normalize();
    }

    /// Divide by the geometric mean of the non-zero strengths.
    fn normalize(&mut self) {
        let logs: Vec<f64> = self.strengths.iter().filter(|&&s| s > 0.0).map(|s| s.ln()).collect();
        if logs.is_empty() {
            return;
        }
        let geo_mean = (logs.iter().sum::<f64>() / logs.len() as f64).exp();
        if geo_mean > 0.0 {
            for s in &mut self.strengths {
                *s /= geo_mean;
            }
        }
    }

    /// Iterate until the largest change drops below the threshold.
    /// Returns the number of iterations run.
    pub fn fit(&mut self, max_iterations: usize) -> usize {
        for iteration in 1..=max_iterations {
            let old = self.strengths.clone();
            self.step();
            let max_change = self
                .strengths
                .iter()
                .zip(&old)
                .map(|(new, old)| (new - old).abs())
                .fold(0.0_f64, f64::max);
            if max_change < CONVERGENCE_THRESHOLD {
                return iteration;
            }
        }
        max_iterations
    }

    /// Strengths of the real items on the log scale, comparable to posterior means up to scale.
    pub fn log_strengths(&self) -> Vec<f64> {
        self.strengths[..self.num_items]
            .iter()
            .map(|&s| if s > 0.0 { s.ln() } else { f64::NEG_INFINITY })
            .collect()
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ranking() {
        let results = vec![(0, 1, 0.9), (0, 2, 0.8), (1, 2, 0.7)];
        let mut bt = BradleyTerry::new(3, &results, 0.01);
        bt.fit(200);
        let scores = bt.log_strengths();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
    }

    #[test]
    fn test_no_comparisons_equal_scores() {
        let mut bt = BradleyTerry::new(2, &[], 0.01);
        bt.fit(50);
        let scores = bt.log_strengths();
        assert!((scores[0] - scores[1]).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_items_level() {
        let results = vec![(0, 1, 0.5), (1, 0, 0.5), (0, 1, 0.5)];
        let mut bt = BradleyTerry::new(2, &results, 0.01);
        bt.fit(100);
        let scores = bt.log_strengths();
        assert!((scores[0] - scores[1]).abs() < 1e-6);
    }

    #[test]
    fn test_undefeated_item_stays_finite() {
        let results = vec![(0, 1, 1.0); 10];
        let mut bt = BradleyTerry::new(2, &results, 0.01);
        bt.fit(500);
        let scores = bt.log_strengths();
        assert!(scores.iter().all(|s| s.is_finite()));
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_out_of_range_results_are_ignored() {
        let bt = BradleyTerry::new(2, &[(0, 5, 1.0), (1, 1, 1.0)], 0.0);
        assert_eq!(bt.total_wins[0], 0.0);
        assert_eq!(bt.num_items(), 2);
    }
}
