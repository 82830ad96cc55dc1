//! Transaction manager
//!
//! Issues monotonic transaction timestamps, tracks transaction state in a
//! node-global concurrent map, and drives the finish protocol: commit and
//! rollback fan out a finish request to every enlisted node and complete
//! only after all per-node futures aggregate.
//!
//! State transitions are idempotent. A finish call that finds the
//! transaction already terminal is a no-op; finish-time failures surface to
//! the caller but never reopen a terminal state — the replication layer
//! owns eventual delivery to partitions that missed the finish.

use crate::context::TxContext;
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{NodeId, PartitionRef, Result, TxId, TxState};

/// How many finished transactions keep their terminal state queryable
///
/// Late state queries (a partition finishing after the coordinator, a
/// client polling an old transaction) are answered from this window;
/// entries older than the window are forgotten.
const FINISHED_RETENTION: usize = 4096;

/// Issues transaction ids
///
/// Implemented by the transaction manager; the row store uses it to run
/// implicit single-operation transactions without depending on the full
/// manager surface.
pub trait TxIdSource: Send + Sync {
    /// Next timestamp in this node's monotonic sequence
    fn next_tx_id(&self) -> TxId;
}

/// Boundary for delivering finish requests to a node
///
/// The engine's transport implements this; the manager stays unaware of
/// how a node address is reached. The originating node is dispatched like
/// any other enlisted node, which keeps the local and remote finish paths
/// identical.
pub trait FinishDispatch: Send + Sync {
    /// Deliver a finish request for `tx_id` to `node`
    ///
    /// The returned future completes when every named partition on that
    /// node has applied the finish command.
    fn dispatch_finish(
        &self,
        node: NodeId,
        tx_id: TxId,
        commit: bool,
        partitions: Vec<PartitionRef>,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Manages transaction lifecycle and the finish protocol
///
/// # Thread safety
///
/// The TxId→TxState map is the node-global transaction table; transitions
/// go through [`TransactionManager::mark_finished`], which claims the
/// Pending→terminal edge exactly once. Everything else is lock-free.
pub struct TransactionManager {
    node: NodeId,
    ticks: AtomicU64,
    states: DashMap<TxId, TxState>,
    finished: Mutex<VecDeque<TxId>>,
    dispatch: Arc<dyn FinishDispatch>,
}

impl TransactionManager {
    /// Create a manager for `node`, delivering finish requests through
    /// `dispatch`
    pub fn new(node: NodeId, dispatch: Arc<dyn FinishDispatch>) -> Arc<Self> {
        Arc::new(TransactionManager {
            node,
            ticks: AtomicU64::new(0),
            states: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            dispatch,
        })
    }

    /// The node this manager issues timestamps for
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Begin a transaction: issue a timestamp and register Pending state
    pub fn begin(self: &Arc<Self>) -> Arc<TxContext> {
        let tx_id = self.next_tx_id();
        self.states.insert(tx_id, TxState::Pending);
        tracing::debug!(%tx_id, "transaction begun");
        Arc::new(TxContext::new(tx_id, self.node, Arc::clone(self)))
    }

    /// Current state of `tx_id`, if it is still within the retention window
    pub fn state_of(&self, tx_id: TxId) -> Option<TxState> {
        self.states.get(&tx_id).map(|s| *s)
    }

    /// Transition `tx_id` to its terminal state
    ///
    /// Idempotent: returns `(state, claimed)` where `claimed` is true only
    /// for the call that performed the Pending→terminal edge. A node that
    /// never saw `begin` (the remote side of a finish) registers the
    /// terminal state directly.
    pub fn mark_finished(&self, tx_id: TxId, commit: bool) -> (TxState, bool) {
        let mut entry = self.states.entry(tx_id).or_insert(TxState::Pending);
        let current = *entry.value();
        if current.is_terminal() {
            return (current, false);
        }
        let terminal = TxState::terminal(commit);
        *entry.value_mut() = terminal;
        drop(entry);

        let mut finished = self.finished.lock();
        finished.push_back(tx_id);
        while finished.len() > FINISHED_RETENTION {
            if let Some(evicted) = finished.pop_front() {
                self.states.remove(&evicted);
            }
        }
        (terminal, true)
    }

    /// Commit `ctx` across every enlisted node
    pub async fn commit(&self, ctx: &TxContext) -> Result<()> {
        self.finish(ctx, true).await
    }

    /// Roll back `ctx` across every enlisted node
    pub async fn rollback(&self, ctx: &TxContext) -> Result<()> {
        self.finish(ctx, false).await
    }

    async fn finish(&self, ctx: &TxContext, commit: bool) -> Result<()> {
        let tx_id = ctx.tx_id();
        let (state, claimed) = self.mark_finished(tx_id, commit);
        if !claimed {
            tracing::debug!(%tx_id, %state, "finish no-op; already terminal");
            return Ok(());
        }
        tracing::debug!(%tx_id, commit, "finishing transaction");

        let enlisted = ctx.enlisted_snapshot();
        let finishes = enlisted.into_iter().map(|(node, partitions)| {
            self.dispatch
                .dispatch_finish(node, tx_id, commit, partitions.into_iter().collect())
        });
        // The terminal state stands even if a partition's finish fails; the
        // replication layer owns eventual delivery there.
        try_join_all(finishes).await?;
        Ok(())
    }
}

impl TxIdSource for TransactionManager {
    fn next_tx_id(&self) -> TxId {
        let ticks = self
            .ticks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| t.checked_add(1))
            .expect("transaction timestamp overflow: u64::MAX reached");
        TxId::new(ticks + 1, self.node)
    }
}
