//! Per-transaction context
//!
//! A `TxContext` carries everything the finish protocol needs to know
//! about one transaction: its timestamp, the originating node, and the
//! map of enlisted partitions per node. Contexts are shared behind `Arc`
//! between the API surface and the transaction manager; lock states and
//! row slots never hold one — they store plain `TxId`s, so the ownership
//! graph stays acyclic.

use crate::manager::TransactionManager;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::{NodeId, PartitionRef, Result, TxId, TxState};

/// Per-transaction state: timestamp, origin, enlisted partitions
pub struct TxContext {
    tx_id: TxId,
    origin: NodeId,
    enlisted: Mutex<HashMap<NodeId, BTreeSet<PartitionRef>>>,
    manager: Arc<TransactionManager>,
}

impl TxContext {
    pub(crate) fn new(tx_id: TxId, origin: NodeId, manager: Arc<TransactionManager>) -> Self {
        TxContext {
            tx_id,
            origin,
            enlisted: Mutex::new(HashMap::new()),
            manager,
        }
    }

    /// This transaction's timestamp
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// The node that issued the timestamp
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Current lifecycle state
    ///
    /// `None` when the transaction finished long enough ago to fall out of
    /// the manager's retention window.
    pub fn state(&self) -> Option<TxState> {
        self.manager.state_of(self.tx_id)
    }

    /// Record that an operation touched `partition` on `node`
    ///
    /// Returns true on first-time enlistment of that partition. Commit and
    /// rollback consult the enlisted map to fan out finish requests.
    pub fn enlist(&self, node: NodeId, partition: PartitionRef) -> bool {
        self.enlisted.lock().entry(node).or_default().insert(partition)
    }

    /// Copy of the enlisted map, taken under the context lock
    pub fn enlisted_snapshot(&self) -> HashMap<NodeId, BTreeSet<PartitionRef>> {
        self.enlisted.lock().clone()
    }

    /// Commit across all enlisted partitions
    pub async fn commit(&self) -> Result<()> {
        self.manager.commit(self).await
    }

    /// Roll back across all enlisted partitions
    pub async fn rollback(&self) -> Result<()> {
        self.manager.rollback(self).await
    }

    /// Blocking form of [`TxContext::commit`], for non-async callers
    ///
    /// Must not be called from within an async executor thread.
    pub fn commit_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.commit())
    }

    /// Blocking form of [`TxContext::rollback`], for non-async callers
    ///
    /// Must not be called from within an async executor thread.
    pub fn rollback_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.rollback())
    }
}

impl std::fmt::Debug for TxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("tx_id", &self.tx_id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}
