//! Node runtime
//!
//! A node owns the transaction manager, its tables, and the replica groups
//! behind them. It is also the server side of the wire surface: routed
//! command envelopes execute here, and finish requests fanned out by a
//! coordinator land in [`Node::apply_finish`].

use crate::mesh::LoopbackMesh;
use crate::table::Table;
use crate::wire::{CommandRequest, TxFinishRequest};
use dashmap::DashMap;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::{LockManager, TransactionManager, TxContext, TxIdSource};
use tessera_core::{EngineConfig, Error, NodeId, PartitionId, Result};
use tessera_replication::{Command, ReplicaGroup, Response, StateMachine};
use tessera_storage::RowStore;

/// One cluster node: transaction manager plus partitioned tables
pub struct Node {
    id: NodeId,
    config: EngineConfig,
    tx_manager: Arc<TransactionManager>,
    tables: DashMap<String, Arc<Table>>,
}

impl Node {
    /// Create a node wired into `mesh` and register it there
    ///
    /// Must be called from within a tokio runtime; table creation spawns
    /// partition appliers.
    pub fn new(config: EngineConfig, mesh: &Arc<LoopbackMesh>) -> Arc<Self> {
        let id = NodeId::new();
        let dispatch = Arc::clone(mesh);
        let tx_manager = TransactionManager::new(id, dispatch);
        let node = Arc::new(Node {
            id,
            config,
            tx_manager,
            tables: DashMap::new(),
        });
        mesh.register(&node);
        tracing::debug!(node = %node.id, "node started");
        node
    }

    /// This node's address
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The configuration the node was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The node's transaction manager
    pub fn tx_manager(&self) -> &Arc<TransactionManager> {
        &self.tx_manager
    }

    /// Begin an explicit transaction originating at this node
    pub fn begin(&self) -> Arc<TxContext> {
        self.tx_manager.begin()
    }

    /// Create `name` with the configured partition count, or return the
    /// existing handle
    ///
    /// Each partition gets its own lock manager, row store, state machine
    /// and replica group; the group's applier task is spawned here and
    /// stops when the table is dropped.
    pub fn create_table(&self, name: &str) -> Arc<Table> {
        if let Some(existing) = self.tables.get(name) {
            return existing.clone();
        }
        let partitions = self.config.partition_count_per_table.max(1);
        let ids: Arc<dyn TxIdSource> = Arc::clone(&self.tx_manager) as Arc<dyn TxIdSource>;
        let groups = (0..partitions)
            .map(|index| {
                let locks = Arc::new(LockManager::new());
                let store = Arc::new(RowStore::new(locks, Arc::clone(&ids)));
                ReplicaGroup::spawn(Arc::new(StateMachine::new(PartitionId(index), store)))
            })
            .collect();
        let table = Arc::new(Table::new(
            name.to_string(),
            self.id,
            groups,
            Arc::clone(&self.tx_manager),
            Duration::from_millis(self.config.default_query_timeout_ms),
        ));
        self.tables.insert(name.to_string(), Arc::clone(&table));
        tracing::debug!(node = %self.id, table = name, partitions, "table created");
        table
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).map(|t| t.clone())
    }

    /// Drop `name`, tearing down its partitions; true if it existed
    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Server side of the per-command wire surface
    pub async fn execute(&self, req: CommandRequest) -> Result<Response> {
        let table = self.table(&req.table).ok_or_else(|| {
            Error::replication(format!("unknown table {} on node {}", req.table, self.id))
        })?;
        table.execute(req).await
    }

    /// Server side of the finish fan-out
    ///
    /// Transitions the transaction's state on this node, then submits a
    /// finish command to each named partition. Idempotent with respect to
    /// the state transition; partitions apply finish through their logs.
    pub async fn apply_finish(&self, req: TxFinishRequest) -> Result<()> {
        let (state, _) = self.tx_manager.mark_finished(req.tx_id, req.commit);
        tracing::debug!(node = %self.id, tx_id = %req.tx_id, %state, "applying finish");

        let finishes = req.partitions.iter().map(|part| async move {
            let table = self.table(&part.table).ok_or_else(|| {
                Error::replication(format!(
                    "finish for unknown table {} on node {}",
                    part.table, self.id
                ))
            })?;
            let group = table.group(part.partition).ok_or_else(|| {
                Error::replication(format!(
                    "finish for unknown partition {} on node {}",
                    part, self.id
                ))
            })?;
            let command = if req.commit {
                Command::Commit { tx_id: req.tx_id }
            } else {
                Command::Rollback { tx_id: req.tx_id }
            };
            group.submit(command).await.map(|_| ())
        });
        try_join_all(finishes).await?;
        Ok(())
    }
}
