/// Belief store: per-item Gaussian posteriors over latent merit.
///
/// The state is a pure fold over the event log: `apply` is deterministic in
/// (prior state, event) and never mutates anything when it fails. Items are
/// kept in a `BTreeMap` so iteration order, and therefore every derived
/// quantity, does not depend on hashing.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BeliefError;
use crate::thurstone::{self, Gaussian, ModelConfig};
use crate::types::{Comparison, Event, EventPayload, ItemId, RankedItem, RankingSnapshot};

/// z-score for the 95% credible interval reported with each ranked item.
const Z_95: f64 = 1.959_963_984_540_054;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBelief {
    pub mean: f64,
    pub variance: f64,
    /// Comparisons this item has taken part in.
    pub comparisons: u64,
    /// Retired items stay in the state so old events still replay, but are
    /// excluded from rankings and pair selection.
    pub retired: bool,
    /// Sequence of the event that first referenced this item.
    pub registered_at: u64,
}

impl ItemBelief {
    pub fn gaussian(&self) -> Gaussian {
        Gaussian { mean: self.mean, variance: self.variance }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStats {
    pub count: u64,
    /// Sequence of the most recent comparison of this pair.
    pub last_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    model: ModelConfig,
    items: BTreeMap<ItemId, ItemBelief>,
    /// Keyed by `(lower id, higher id)`.
    #[serde(with = "pair_map")]
    pairs: BTreeMap<(ItemId, ItemId), PairStats>,
    comparisons: u64,
    sequence: u64,
}

impl BeliefState {
    pub fn new(model: ModelConfig) -> Self {
        BeliefState {
            model,
            items: BTreeMap::new(),
            pairs: BTreeMap::new(),
            comparisons: 0,
            sequence: 0,
        }
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Sequence number of the last applied event (0 = empty log).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Total comparisons applied.
    pub fn comparisons(&self) -> u64 {
        self.comparisons
    }

    pub fn item(&self, id: &ItemId) -> Option<&ItemBelief> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn is_active(&self, id: &ItemId) -> bool {
        self.items.get(id).is_some_and(|b| !b.retired)
    }

    pub fn items(&self) -> impl Iterator<Item = (&ItemId, &ItemBelief)> {
        self.items.iter()
    }

    pub fn active_items(&self) -> impl Iterator<Item = (&ItemId, &ItemBelief)> {
        self.items.iter().filter(|(_, b)| !b.retired)
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn pair_stats(&self, a: &ItemId, b: &ItemId) -> Option<PairStats> {
        self.pairs.get(&pair_key(a, b)).copied()
    }

    /// Register an item with the prior belief if it is not already present.
    /// A retired item is reinstated with its belief intact. Idempotent.
    pub fn initialize(&mut self, item: &ItemId) {
        let at = self.sequence;
        let prior = self.model.prior();
        self.items
            .entry(item.clone())
            .and_modify(|b| b.retired = false)
            .or_insert_with(|| ItemBelief {
                mean: prior.mean,
                variance: prior.variance,
                comparisons: 0,
                retired: false,
                registered_at: at,
            });
    }

    /// Apply one log event.
    ///
    /// Returns `Ok(false)` for an event this state already reflects, which
    /// makes replaying an overlapping range harmless. A gap in sequence
    /// numbers is an error. On error the state is unchanged.
    pub fn apply(&mut self, event: &Event) -> Result<bool, BeliefError> {
        if event.sequence <= self.sequence {
            return Ok(false);
        }
        if event.sequence != self.sequence + 1 {
            return Err(BeliefError::OutOfOrder { current: self.sequence, found: event.sequence });
        }

        match &event.payload {
            EventPayload::Comparison(comparison) => self.apply_comparison(event.sequence, comparison)?,
            EventPayload::RegisterItem { item } => {
                self.sequence = event.sequence;
                self.initialize(item);
            }
            EventPayload::RetireItem { item } => {
                self.sequence = event.sequence;
                self.initialize(item);
                if let Some(belief) = self.items.get_mut(item) {
                    belief.retired = true;
                }
            }
        }
        self.sequence = event.sequence;
        Ok(true)
    }

    fn apply_comparison(&mut self, sequence: u64, c: &Comparison) -> Result<(), BeliefError> {
        let prior = self.model.prior();
        let left = self.items.get(&c.left).map_or(prior, ItemBelief::gaussian);
        let right = self.items.get(&c.right).map_or(prior, ItemBelief::gaussian);

        let (new_left, new_right) = thurstone::update(&self.model, &left, &right, c.outcome)?;
        let finite = |g: &Gaussian| g.mean.is_finite() && g.variance.is_finite();
        if !finite(&new_left) || !finite(&new_right) {
            return Err(BeliefError::NonFinite { left: c.left.clone(), right: c.right.clone() });
        }

        // Nothing below can fail.
        self.sequence = sequence;
        for (id, posterior) in [(&c.left, new_left), (&c.right, new_right)] {
            self.initialize_at(id, sequence);
            if let Some(belief) = self.items.get_mut(id) {
                belief.mean = posterior.mean;
                belief.variance = posterior.variance;
                belief.comparisons += 1;
            }
        }
        let stats = self.pairs.entry(pair_key(&c.left, &c.right)).or_default();
        stats.count += 1;
        stats.last_sequence = sequence;
        self.comparisons += 1;
        Ok(())
    }

    /// Auto-registration on first reference. Unlike `initialize`, this does
    /// not reinstate retired items.
    fn initialize_at(&mut self, item: &ItemId, sequence: u64) {
        if !self.items.contains_key(item) {
            let prior = self.model.prior();
            self.items.insert(
                item.clone(),
                ItemBelief {
                    mean: prior.mean,
                    variance: prior.variance,
                    comparisons: 0,
                    retired: false,
                    registered_at: sequence,
                },
            );
        }
    }

    /// Active items ordered by posterior mean descending; ties go to the
    /// lower variance, then to the lower item ID.
    pub fn current_ranking(&self) -> RankingSnapshot {
        let mut ranked: Vec<(&ItemId, &ItemBelief)> = self.active_items().collect();
        ranked.sort_by(|(ia, a), (ib, b)| {
            b.mean
                .total_cmp(&a.mean)
                .then(a.variance.total_cmp(&b.variance))
                .then_with(|| ia.cmp(ib))
        });

        let separations: Vec<f64> = ranked
            .windows(2)
            .map(|w| thurstone::order_probability(&w[0].1.gaussian(), &w[1].1.gaussian()))
            .collect();

        let (confidence, min_separation) = if separations.is_empty() {
            (1.0, 1.0)
        } else {
            let mean_margin =
                separations.iter().map(|p| 2.0 * p - 1.0).sum::<f64>() / separations.len() as f64;
            (mean_margin, separations.iter().copied().fold(1.0_f64, f64::min))
        };

        let items = ranked
            .into_iter()
            .map(|(id, b)| {
                let std_dev = b.variance.sqrt();
                RankedItem {
                    item: id.clone(),
                    mean: b.mean,
                    variance: b.variance,
                    std_dev,
                    lower_bound: b.mean - Z_95 * std_dev,
                    upper_bound: b.mean + Z_95 * std_dev,
                    comparisons: b.comparisons,
                }
            })
            .collect();

        RankingSnapshot { sequence: self.sequence, items, confidence, min_separation }
    }
}

pub(crate) fn pair_key(a: &ItemId, b: &ItemId) -> (ItemId, ItemId) {
    if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) }
}

/// JSON object keys must be strings, so the pair map is stored as a list.
mod pair_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::PairStats;
    use crate::types::ItemId;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        a: ItemId,
        b: ItemId,
        count: u64,
        last_sequence: u64,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<(ItemId, ItemId), PairStats>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter().map(|((a, b), s)| Entry {
            a: a.clone(),
            b: b.clone(),
            count: s.count,
            last_sequence: s.last_sequence,
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(ItemId, ItemId), PairStats>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.a, e.b), PairStats { count: e.count, last_sequence: e.last_sequence }))
            .collect())
    }
}
