use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_ID_LEN;
use crate::error::InvalidEvent;

/// Stable identifier of a ranked item.
///
/// Deserialization trusts its input (log records were validated before they
/// were written); use [`ItemId::parse`] for anything coming from a caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Validate a caller-provided identifier: 1..=128 bytes of `[A-Za-z0-9_.:-]`.
    pub fn parse(raw: &str) -> Result<Self, InvalidEvent> {
        check_identifier(raw).map_err(|reason| InvalidEvent::MalformedItemId {
            id: raw.to_string(),
            reason,
        })?;
        Ok(ItemId(raw.to_string()))
    }

    /// For identifiers the crate generates itself.
    pub(crate) fn new_unchecked(raw: String) -> Self {
        debug_assert!(check_identifier(&raw).is_ok());
        ItemId(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_identifier(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err("must not be empty");
    }
    if raw.len() > MAX_ID_LEN {
        return Err("longer than 128 bytes");
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':');
    if !raw.chars().all(allowed) {
        return Err("only ASCII letters, digits and `_ - . :` are allowed");
    }
    Ok(())
}

/// Validate a judge identifier. Judges are free text but must be printable.
pub(crate) fn check_judge(raw: &str) -> Result<(), InvalidEvent> {
    let reason = if raw.trim().is_empty() {
        Some("must not be empty")
    } else if raw.len() > MAX_ID_LEN {
        Some("longer than 128 bytes")
    } else if raw.chars().any(char::is_control) {
        Some("contains control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(InvalidEvent::MalformedJudgeId { id: raw.to_string(), reason }),
        None => Ok(()),
    }
}

/// Result of a single pairwise judgment, from the left item's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "p", rename_all = "snake_case")]
pub enum Outcome {
    LeftWins,
    RightWins,
    Tie,
    /// P(left wins), 0.0 to 1.0. Typically a calibrated judge or a likert
    /// verdict mapped to a probability.
    Probability(f64),
}

impl Outcome {
    /// The same judgment seen from the right item's side.
    pub fn mirrored(self) -> Self {
        match self {
            Outcome::LeftWins => Outcome::RightWins,
            Outcome::RightWins => Outcome::LeftWins,
            Outcome::Tie => Outcome::Tie,
            Outcome::Probability(p) => Outcome::Probability(1.0 - p),
        }
    }

    /// Fractional win credit for the left item (1 = win, 0.5 = tie).
    pub fn left_score(self) -> f64 {
        match self {
            Outcome::LeftWins => 1.0,
            Outcome::RightWins => 0.0,
            Outcome::Tie => 0.5,
            Outcome::Probability(p) => p,
        }
    }
}

/// A validated comparison, ready to be logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: ItemId,
    pub right: ItemId,
    pub outcome: Outcome,
    pub judge: String,
}

/// What a log record does to the belief state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Comparison(Comparison),
    RegisterItem { item: ItemId },
    RetireItem { item: ItemId },
}

/// A durable log record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn comparison(&self) -> Option<&Comparison> {
        match &self.payload {
            EventPayload::Comparison(c) => Some(c),
            _ => None,
        }
    }
}

/// Raw comparison as received from the service boundary. Nothing here is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub left: String,
    pub right: String,
    /// `left`, `right`, `tie`, a likert letter `A`-`E`, or a probability.
    pub outcome: String,
    pub judge: String,
}

/// Returned once a submission is durable and applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acknowledgement {
    pub sequence: u64,
    /// Next recommended comparison, `None` when the ranking is confident.
    pub next_pair: Option<Pair>,
}

/// An item in a ranking snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: ItemId,
    /// Posterior mean merit.
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    /// 95% credible interval bounds.
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Comparisons this item has taken part in.
    pub comparisons: u64,
}

/// Read-only ordering of active items by posterior mean, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    /// Sequence number of the last event reflected in this ranking.
    pub sequence: u64,
    pub items: Vec<RankedItem>,
    /// Mean of `2 * P(correct order) - 1` over adjacent pairs: 0 is a coin
    /// flip everywhere, 1 is certain. 1 when fewer than two items are ranked.
    pub confidence: f64,
    /// Smallest adjacent P(correct order). 1 when fewer than two items are ranked.
    pub min_separation: f64,
}

impl RankingSnapshot {
    pub fn position(&self, item: &ItemId) -> Option<usize> {
        self.items.iter().position(|r| &r.item == item)
    }

    pub fn order(&self) -> Vec<ItemId> {
        self.items.iter().map(|r| r.item.clone()).collect()
    }
}

/// A pairing: two item IDs to be compared, lower ID first.
pub type Pair = (ItemId, ItemId);

/// Maps between item IDs and dense 0..N indices for batch computations.
pub(crate) struct IdMap {
    ids: Vec<ItemId>,
    id_to_idx: HashMap<ItemId, usize>,
}

impl IdMap {
    pub fn from_ids(ids: &[ItemId]) -> Self {
        let mut id_to_idx = HashMap::with_capacity(ids.len());
        let mut unique = Vec::with_capacity(ids.len());
        for id in ids {
            if !id_to_idx.contains_key(id) {
                id_to_idx.insert(id.clone(), unique.len());
                unique.push(id.clone());
            }
        }
        IdMap { ids: unique, id_to_idx }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn to_idx(&self, id: &ItemId) -> Option<usize> {
        self.id_to_idx.get(id).copied()
    }

    pub fn to_id(&self, idx: usize) -> &ItemId {
        &self.ids[idx]
    }

    /// Convert comparisons to `(left_idx, right_idx, left_score)`, dropping
    /// any that reference an item outside the map.
    pub fn convert_comparisons<'a>(
        &self,
        comparisons: impl IntoIterator<Item = &'a Comparison>,
    ) -> Vec<(usize, usize, f64)> {
        comparisons
            .into_iter()
            .filter_map(|c| {
                let l = self.to_idx(&c.left)?;
                let r = self.to_idx(&c.right)?;
                Some((l, r, c.outcome.left_score()))
            })
            .collect()
    }
}
