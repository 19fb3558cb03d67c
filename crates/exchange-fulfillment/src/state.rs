//! Fulfillment states and the per-upload session.

use std::fmt;

use exchange_types::{ExchangeIdentity, FulfillmentId, RevisionId};
use serde::{Deserialize, Serialize};

/// Position of one upload in the fulfillment state machine.
///
/// The happy path runs top to bottom; any fatal failure after `Started`
/// moves to `Discarding` and then `Discarded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FulfillmentState {
    Created,
    Started,
    StylesProcessed,
    AssetsResolved,
    GeometriesUploaded,
    CustomUploaded,
    LargePrimitivesUploaded,
    SyncBuilt,
    Batched,
    Acknowledged,
    Finished,
    Polled,
    Completed,
    Discarding,
    Discarded,
}

impl FulfillmentState {
    /// Happy-path successor, or `None` for terminal and rollback states.
    pub fn next(self) -> Option<FulfillmentState> {
        use FulfillmentState::*;
        match self {
            Created => Some(Started),
            Started => Some(StylesProcessed),
            StylesProcessed => Some(AssetsResolved),
            AssetsResolved => Some(GeometriesUploaded),
            GeometriesUploaded => Some(CustomUploaded),
            CustomUploaded => Some(LargePrimitivesUploaded),
            LargePrimitivesUploaded => Some(SyncBuilt),
            SyncBuilt => Some(Batched),
            Batched => Some(Acknowledged),
            Acknowledged => Some(Finished),
            Finished => Some(Polled),
            Polled => Some(Completed),
            Completed | Discarding | Discarded => None,
        }
    }

    /// Whether a failure while entering this state aborts the run.
    pub fn is_fatal(self) -> bool {
        use FulfillmentState::*;
        !matches!(
            self,
            StylesProcessed | AssetsResolved | CustomUploaded | LargePrimitivesUploaded
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FulfillmentState::Completed | FulfillmentState::Discarded)
    }

    /// Whether `to` is a legal move from `self`.
    pub fn can_transition_to(self, to: FulfillmentState) -> bool {
        if self.next() == Some(to) {
            return true;
        }
        match (self, to) {
            (FulfillmentState::Discarding, FulfillmentState::Discarded) => true,
            // Rollback needs a fulfillment to discard.
            (from, FulfillmentState::Discarding) => {
                from >= FulfillmentState::Started && !from.is_terminal() && from != FulfillmentState::Discarding
            }
            _ => false,
        }
    }
}

impl fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Completed,
    /// Rolled back after a fatal failure.
    Discarded,
    /// Failed with nothing to roll back, or the discard itself failed.
    Failed,
}

/// Order in which the service applies operations inside a fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOrder {
    InsertFirst,
    RemoveFirst,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOrder::InsertFirst => f.write_str("INSERT_FIRST"),
            ExecutionOrder::RemoveFirst => f.write_str("REMOVE_FIRST"),
        }
    }
}

/// Ephemeral state of one upload call.
#[derive(Debug, Clone)]
pub struct FulfillmentSession {
    pub exchange: ExchangeIdentity,
    /// Set once `Started` succeeds.
    pub fulfillment_id: Option<FulfillmentId>,
    pub state: FulfillmentState,
    /// Batch calls issued in the last `Batched` phase.
    pub pending_batches: usize,
    pub revision: Option<RevisionId>,
    pub outcome: Option<TerminalOutcome>,
}

impl FulfillmentSession {
    pub fn new(exchange: ExchangeIdentity) -> Self {
        Self {
            exchange,
            fulfillment_id: None,
            state: FulfillmentState::Created,
            pending_batches: 0,
            revision: None,
            outcome: None,
        }
    }

    /// Fulfillment id as a string, empty before `Started`.
    pub fn fulfillment_str(&self) -> &str {
        self.fulfillment_id
            .as_ref()
            .map(FulfillmentId::as_str)
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_linear() {
        let mut state = FulfillmentState::Created;
        let mut steps = 0;
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            steps += 1;
        }
        assert_eq!(state, FulfillmentState::Completed);
        assert_eq!(steps, 12);
    }

    #[test]
    fn test_rollback_only_after_start() {
        use FulfillmentState::*;
        assert!(!Created.can_transition_to(Discarding));
        assert!(Started.can_transition_to(Discarding));
        assert!(Polled.can_transition_to(Discarding));
        assert!(!Completed.can_transition_to(Discarding));
        assert!(Discarding.can_transition_to(Discarded));
        assert!(!Discarding.can_transition_to(Discarding));
    }

    #[test]
    fn test_fatal_partition() {
        use FulfillmentState::*;
        for s in [StylesProcessed, AssetsResolved, CustomUploaded, LargePrimitivesUploaded] {
            assert!(!s.is_fatal(), "{s} should be best-effort");
        }
        for s in [Started, GeometriesUploaded, SyncBuilt, Batched, Acknowledged, Finished, Polled] {
            assert!(s.is_fatal(), "{s} should be fatal");
        }
    }
}
