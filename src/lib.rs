//! # Tessera
//!
//! A distributed transactional key-value partition layer: a per-partition
//! row store participating in multi-partition ACID transactions under
//! pessimistic two-phase locking, replicated by a Raft-style consensus
//! group.
//!
//! # Quick start
//!
//! ```no_run
//! use tessera::{EngineConfig, Key, LoopbackMesh, Node, Row, Wrap};
//!
//! #[tokio::main]
//! async fn main() -> tessera::Result<()> {
//!     let mesh = LoopbackMesh::new();
//!     let node = Node::new(EngineConfig::default(), &mesh);
//!     let accounts = node.create_table("accounts");
//!
//!     // Implicit transaction: one operation, committed inline.
//!     accounts.upsert(Row::new("alice", "100"), None).await?;
//!
//!     // Explicit transaction across operations.
//!     let tx = node.begin();
//!     let view = tx.wrap(&accounts);
//!     let balance = view.get(&Key::from("alice")).await?;
//!     view.upsert(Row::new("alice", "90")).await?;
//!     view.upsert(Row::new("bob", "10")).await?;
//!     tx.commit().await?;
//!
//!     assert!(balance.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Layer | Crate | Role |
//! |-------|-------|------|
//! | Lock manager | `tessera-concurrency` | Per-key reader/writer queues, wound-wait ordering |
//! | Row store | `tessera-storage` | Committed values plus per-transaction staging |
//! | Transactions | `tessera-concurrency` | Timestamps, state tracking, finish fan-out |
//! | State machine | `tessera-replication` | Deterministic command applier, snapshots |
//! | Router | `tessera-engine` | Affinity hashing, batch fan-out, enlistment |
//!
//! Conflicts are resolved by wound-wait on the transaction-id order, so
//! there are no deadlocks; cross-partition atomicity comes from the finish
//! fan-out over every enlisted partition.

pub use tessera_core::{
    EngineConfig, Error, Key, NodeId, PartitionId, PartitionRef, Result, Row, TxId, TxState,
    Value,
};

pub use tessera_concurrency::{
    FinishDispatch, LockManager, TransactionManager, TxContext, TxIdSource,
};

pub use tessera_storage::RowStore;

pub use tessera_replication::{Command, ReplicaGroup, Response, SnapshotHeader, StateMachine};

pub use tessera_engine::{
    CommandRequest, LoopbackMesh, Node, Table, TxFinishRequest, TxTable, Wrap,
};
