//! Concurrency layer for Tessera
//!
//! This crate implements pessimistic two-phase locking with wound-wait
//! deadlock avoidance:
//! - LockManager: per-key shared/exclusive waiter queues ordered by TxId
//! - TransactionManager: timestamp issuance, tx state tracking, finish fan-out
//! - TxContext: per-transaction enlistment and finish entry points
//!
//! There are no deadlocks by construction: every lock conflict is resolved
//! by the transaction-id order, so the wait-for graph is acyclic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod lock;
pub mod manager;

pub use context::TxContext;
pub use lock::LockManager;
pub use manager::{FinishDispatch, TransactionManager, TxIdSource};
