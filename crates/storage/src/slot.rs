//! Row slot: committed value plus at most one staged write

use tessera_core::{TxId, Value};

/// An uncommitted write staged by one transaction
///
/// `value == None` encodes a staged delete. The exclusive lock on the key
/// guarantees a single pending writer at any time.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub value: Option<Value>,
    pub writer: TxId,
}

/// Per-key storage cell
#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
    pub committed: Option<Value>,
    pub pending: Option<PendingWrite>,
}

impl Slot {
    /// The value `tx` observes: its own staging if it is the writer,
    /// otherwise the committed value
    pub fn visible_to(&self, tx: TxId) -> Option<&Value> {
        match &self.pending {
            Some(p) if p.writer == tx => p.value.as_ref(),
            _ => self.committed.as_ref(),
        }
    }

    /// True once neither a committed value nor staging remains
    pub fn is_vacant(&self) -> bool {
        self.committed.is_none() && self.pending.is_none()
    }
}
