/// Error types for the ranking engine and its event log.
///
/// The split follows what a caller can do about each failure:
/// [`InvalidEvent`] means "fix and resend", [`DurabilityError`] means "retry
/// the same request", and [`EngineError::Fatal`] / [`EngineError::Halted`]
/// mean the engine has stopped accepting writes.
use thiserror::Error;

use crate::types::ItemId;

/// A submission was rejected before anything was written.
#[derive(Debug, Error)]
pub enum InvalidEvent {
    #[error("Malformed item ID {id:?}: {reason}")]
    MalformedItemId { id: String, reason: &'static str },

    #[error("Malformed judge ID {id:?}: {reason}")]
    MalformedJudgeId { id: String, reason: &'static str },

    #[error("An item cannot be compared with itself: {0}")]
    SelfComparison(ItemId),

    #[error("Unrecognized outcome {0:?}")]
    UnrecognizedOutcome(String),

    #[error("Item {0} is retired")]
    RetiredItem(ItemId),

    #[error("Unknown item {0}")]
    UnknownItem(ItemId),
}

/// The event log could not guarantee an append. Nothing was recorded.
#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("Event log write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// A previous failed append could not be rolled back; the log must be reopened.
    #[error("Event log is poisoned by an earlier failed write; reopen it to recover")]
    Poisoned,

    /// Injected by `MemoryLog` in tests.
    #[error("Simulated storage failure")]
    Simulated,
}

/// Errors from opening, replaying or checkpointing the event log.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("Event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt event log record at byte {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("Event log sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Checkpoint for sequence {requested} is ahead of the durable log (last sequence {durable})")]
    CheckpointAhead { requested: u64, durable: u64 },

    #[error("Checkpoint labelled {requested} holds a belief state at sequence {state}")]
    CheckpointMismatch { requested: u64, state: u64 },

    #[error("Checkpoint encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from applying an event to the belief state.
#[derive(Debug, Error)]
pub enum BeliefError {
    /// An outcome outside the defined set reached the apply stage.
    #[error("Unknown outcome: {0}")]
    UnknownOutcome(String),

    #[error("Event {found} applied out of order (belief state is at {current})")]
    OutOfOrder { current: u64, found: u64 },

    #[error("Posterior update for {left} vs {right} produced a non-finite value")]
    NonFinite { left: ItemId, right: ItemId },
}

/// Everything the ranking engine can report to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid event: {0}")]
    Invalid(#[from] InvalidEvent),

    #[error("Durability error: {0}")]
    Durability(#[from] DurabilityError),

    #[error("Event log error: {0}")]
    Log(#[from] WalError),

    /// A durably logged event could not be applied. The engine halts.
    #[error("Fatal invariant violation at sequence {sequence}: {source}")]
    Fatal {
        sequence: u64,
        #[source]
        source: BeliefError,
    },

    #[error("Engine halted after a fatal error: {0}")]
    Halted(String),

    #[error("Engine is still recovering from the event log")]
    NotReady,

    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether resending the identical request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Durability(_) | EngineError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::from(DurabilityError::Simulated).is_retryable());
        assert!(EngineError::NotReady.is_retryable());
        assert!(!EngineError::from(InvalidEvent::UnrecognizedOutcome("maybe".into())).is_retryable());
        assert!(!EngineError::Halted("boom".into()).is_retryable());
    }
}
