/// Cross-check of the online posterior against a batch Bradley-Terry fit.
use serde::Serialize;

use crate::belief::BeliefState;
use crate::bradley_terry::BradleyTerry;
use crate::error::WalError;
use crate::event_log::EventLog;
use crate::types::{Comparison, IdMap, ItemId};

const BT_REGULARIZATION: f64 = 0.01;
const BT_MAX_ITERATIONS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub item: ItemId,
    pub posterior_rank: usize,
    pub batch_rank: usize,
    pub posterior_mean: f64,
    pub batch_log_strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossCheck {
    /// Sequence of the last event included in the batch fit.
    pub sequence: u64,
    pub comparisons: usize,
    pub iterations: usize,
    /// Rank correlation between the two orderings, in `[-1, 1]`.
    pub kendall_tau: f64,
    /// Entries in posterior order.
    pub entries: Vec<AuditEntry>,
}

/// Refit every logged comparison among the active items of `state` and
/// compare the resulting order with the posterior order.
///
/// Only events up to `state.sequence()` are read.
pub fn cross_check<L: EventLog + ?Sized>(log: &L, state: &BeliefState) -> Result<CrossCheck, WalError> {
    let ranking = state.current_ranking();
    let order = ranking.order();
    let id_map = IdMap::from_ids(&order);

    let mut comparisons: Vec<Comparison> = Vec::new();
    for event in log.replay(0)? {
        let event = event?;
        if event.sequence > state.sequence() {
            break;
        }
        if let Some(c) = event.comparison() {
            comparisons.push(c.clone());
        }
    }

    let indexed = id_map.convert_comparisons(&comparisons);
    let mut bt = BradleyTerry::new(id_map.len(), &indexed, BT_REGULARIZATION);
    let iterations = bt.fit(BT_MAX_ITERATIONS);
    let strengths = bt.log_strengths();

    let mut batch_order: Vec<usize> = (0..id_map.len()).collect();
    batch_order.sort_by(|&a, &b| strengths[b].total_cmp(&strengths[a]).then(a.cmp(&b)));
    let mut batch_rank = vec![0; id_map.len()];
    for (rank, &idx) in batch_order.iter().enumerate() {
        batch_rank[idx] = rank + 1;
    }

    let entries: Vec<AuditEntry> = ranking
        .items
        .iter()
        .enumerate()
        .map(|(i, r)| AuditEntry {
            item: id_map.to_id(i).clone(),
            posterior_rank: i + 1,
            batch_rank: batch_rank[i],
            posterior_mean: r.mean,
            batch_log_strength: strengths[i],
        })
        .collect();

    let posterior_means: Vec<f64> = ranking.items.iter().map(|r| r.mean).collect();
    Ok(CrossCheck {
        sequence: state.sequence(),
        comparisons: indexed.len(),
        iterations,
        kendall_tau: kendall_tau(&posterior_means, &strengths),
        entries,
    })
}

/// Kendall's tau-a between two score vectors over the same items.
/// Pairs tied in either vector count as neither concordant nor discordant.
pub fn kendall_tau(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 1.0;
    }
    let mut balance = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let sign = (a[i] - a[j]).signum() * (b[i] - b[j]).signum();
            if a[i] != a[j] && b[i] != b[j] {
                balance += if sign > 0.0 { 1 } else { -1 };
            }
        }
    }
    balance as f64 / (n * (n - 1) / 2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemoryLog;
    use crate::thurstone::ModelConfig;
    use crate::types::{EventPayload, Outcome};

    #[test]
    fn test_kendall_tau_extremes() {
        assert_eq!(kendall_tau(&[3.0, 2.0, 1.0], &[30.0, 20.0, 10.0]), 1.0);
        assert_eq!(kendall_tau(&[3.0, 2.0, 1.0], &[1.0, 2.0, 3.0]), -1.0);
        assert_eq!(kendall_tau(&[1.0], &[5.0]), 1.0);
        assert!((kendall_tau(&[3.0, 2.0, 1.0], &[3.0, 1.0, 2.0]) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cross_check_agrees_on_consistent_log() {
        let log = MemoryLog::new();
        let mut state = BeliefState::new(ModelConfig::default());
        let ids: Vec<ItemId> = ["a", "b", "c", "d"].iter().map(|s| ItemId::parse(s).unwrap()).collect();
        for _ in 0..3 {
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    let event = log
                        .append(EventPayload::Comparison(Comparison {
                            left: ids[i].clone(),
                            right: ids[j].clone(),
                            outcome: Outcome::LeftWins,
                            judge: "j".into(),
                        }))
                        .unwrap();
                    state.apply(&event).unwrap();
                }
            }
        }

        let check = cross_check(&log, &state).unwrap();
        assert_eq!(check.comparisons, 18);
        assert_eq!(check.kendall_tau, 1.0);
        assert!(check.entries.iter().all(|e| e.posterior_rank == e.batch_rank));
        assert_eq!(check.entries[0].item, ids[0]);
    }
}
