//! Transaction identity and lifecycle
//!
//! A `TxId` is a globally unique, totally ordered transaction identifier.
//! The order doubles as the wound-wait priority: a smaller `TxId` is an
//! *older* transaction and wins lock conflicts against younger ones.
//!
//! A `TxState` is the replicated view of a transaction's lifecycle. The only
//! legal transitions are `Pending → Committed` and `Pending → Aborted`;
//! terminal states are final.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally ordered transaction identifier
///
/// Composed of a per-node monotonic tick and the issuing node's identity.
/// Ordering compares ticks first and breaks ties on the node id, so the
/// total order is strict even when two nodes issue the same tick.
///
/// `TxId` is a plain value type. Lock states and row slots store `TxId`s,
/// never references to transaction contexts, which keeps ownership acyclic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TxId {
    /// Monotonic counter value issued by the originating node
    pub ticks: u64,
    /// Identity of the originating node (tie-breaker)
    pub node: NodeId,
}

impl TxId {
    /// Create a transaction id from a tick and the issuing node
    pub fn new(ticks: u64, node: NodeId) -> Self {
        Self { ticks, node }
    }

    /// True if `self` was issued before `other` in the global order
    ///
    /// Older transactions have wound-wait priority.
    pub fn is_older_than(&self, other: &TxId) -> bool {
        self < other
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}@{}", self.ticks, self.node)
    }
}

/// Lifecycle state of a transaction
///
/// A transaction enters `Pending` implicitly when its timestamp is issued.
/// `Committed` and `Aborted` are terminal: once reached, further finish
/// calls are no-ops that return the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    /// Transaction is executing; operations may read and stage writes
    Pending,
    /// Transaction committed; staged values were promoted
    Committed,
    /// Transaction aborted; staged values were discarded
    Aborted,
}

impl TxState {
    /// True for `Committed` and `Aborted`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxState::Pending)
    }

    /// The terminal state a finish call with the given direction produces
    pub fn terminal(commit: bool) -> Self {
        if commit {
            TxState::Committed
        } else {
            TxState::Aborted
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Pending => "pending",
            TxState::Committed => "committed",
            TxState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        NodeId::from_bytes([b; 16])
    }

    #[test]
    fn tick_order_dominates() {
        let a = TxId::new(1, node(9));
        let b = TxId::new(2, node(0));
        assert!(a < b);
        assert!(a.is_older_than(&b));
    }

    #[test]
    fn node_breaks_ties() {
        let a = TxId::new(7, node(1));
        let b = TxId::new(7, node(2));
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn order_is_total() {
        let ids = [
            TxId::new(3, node(1)),
            TxId::new(1, node(2)),
            TxId::new(1, node(1)),
            TxId::new(2, node(5)),
        ];
        let mut sorted = ids;
        sorted.sort();
        assert_eq!(sorted[0], TxId::new(1, node(1)));
        assert_eq!(sorted[3], TxId::new(3, node(1)));
    }

    #[test]
    fn terminal_states() {
        assert!(!TxState::Pending.is_terminal());
        assert!(TxState::Committed.is_terminal());
        assert!(TxState::Aborted.is_terminal());
        assert_eq!(TxState::terminal(true), TxState::Committed);
        assert_eq!(TxState::terminal(false), TxState::Aborted);
    }

    #[test]
    fn display_forms() {
        let t = TxId::new(42, node(3));
        let s = t.to_string();
        assert!(s.starts_with("tx-42@"));
        assert_eq!(TxState::Pending.to_string(), "pending");
    }
}
