/// The event log: single source of truth for every accepted judgment.
///
/// [`FileLog`](crate::file_log::FileLog) is the on-disk implementation;
/// [`MemoryLog`] keeps everything in memory and can inject append failures.
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use crate::belief::BeliefState;
use crate::error::{DurabilityError, WalError};
use crate::types::{Event, EventPayload};

/// Lazy, finite stream of events in sequence order.
pub type EventStream<'a> = Box<dyn Iterator<Item = Result<Event, WalError>> + Send + 'a>;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LogStats {
    pub events: u64,
    pub bytes: u64,
    /// Sequences of the retained checkpoints, oldest first.
    pub checkpoints: Vec<u64>,
}

pub trait EventLog: Send + Sync {
    /// Assign the next sequence number and record the event durably.
    ///
    /// On error nothing is recorded and the sequence counter does not advance.
    fn append(&self, payload: EventPayload) -> Result<Event, DurabilityError>;

    /// Persist a belief state that reflects every event up to `sequence`.
    fn append_checkpoint(&self, state: &BeliefState, sequence: u64) -> Result<(), WalError>;

    /// Events with sequence greater than `from`, up to the durable end of
    /// the log at the time of the call.
    fn replay(&self, from: u64) -> Result<EventStream<'_>, WalError>;

    /// Newest readable checkpoint and the sequence it covers.
    fn latest_checkpoint(&self) -> Result<Option<(BeliefState, u64)>, WalError>;

    /// Sequence of the last durable event, 0 for an empty log.
    fn last_sequence(&self) -> u64;

    fn stats(&self) -> LogStats;
}

/// In-memory log for tests and simulation.
///
/// Checkpoints are stored serialized so restoring one goes through the same
/// encoding as the file log.
#[derive(Default)]
pub struct MemoryLog {
    events: Mutex<Vec<Event>>,
    checkpoints: Mutex<Vec<(u64, String)>>,
    fail_appends: AtomicU32,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with [`DurabilityError::Simulated`].
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    /// Copy of every recorded event.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventLog for MemoryLog {
    fn append(&self, payload: EventPayload) -> Result<Event, DurabilityError> {
        let injected = self
            .fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DurabilityError::Simulated);
        }

        let mut events = self.events.lock();
        let event = Event { sequence: events.len() as u64 + 1, timestamp: Utc::now(), payload };
        events.push(event.clone());
        Ok(event)
    }

    fn append_checkpoint(&self, state: &BeliefState, sequence: u64) -> Result<(), WalError> {
        let durable = self.last_sequence();
        if sequence > durable {
            return Err(WalError::CheckpointAhead { requested: sequence, durable });
        }
        if sequence != state.sequence() {
            return Err(WalError::CheckpointMismatch { requested: sequence, state: state.sequence() });
        }
        let encoded = serde_json::to_string(state)?;
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.retain(|(seq, _)| *seq != sequence);
        checkpoints.push((sequence, encoded));
        checkpoints.sort_by_key(|(seq, _)| *seq);
        Ok(())
    }

    fn replay(&self, from: u64) -> Result<EventStream<'_>, WalError> {
        let tail: Vec<Event> =
            self.events.lock().iter().filter(|e| e.sequence > from).cloned().collect();
        Ok(Box::new(tail.into_iter().map(Ok)))
    }

    fn latest_checkpoint(&self) -> Result<Option<(BeliefState, u64)>, WalError> {
        let checkpoints = self.checkpoints.lock();
        match checkpoints.last() {
            Some((seq, encoded)) => Ok(Some((serde_json::from_str(encoded)?, *seq))),
            None => Ok(None),
        }
    }

    fn last_sequence(&self) -> u64 {
        self.events.lock().len() as u64
    }

    fn stats(&self) -> LogStats {
        let events = self.events.lock();
        let bytes = events
            .iter()
            .map(|e| serde_json::to_vec(e).map_or(0, |v| v.len() as u64 + 1))
            .sum();
        LogStats {
            events: events.len() as u64,
            bytes,
            checkpoints: self.checkpoints.lock().iter().map(|(seq, _)| *seq).collect(),
        }
    }
}
