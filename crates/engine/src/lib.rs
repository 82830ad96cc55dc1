//! Engine layer for Tessera
//!
//! Ties the partition layer together into a node runtime:
//! - `Table`: affinity routing of rows to partitions, batch fan-out,
//!   transaction enlistment, implicit single-operation transactions
//! - `Node`: owns the transaction manager, tables and their replica groups
//! - wire messages for cross-node coordination and a loopback transport
//!   that connects in-process nodes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mesh;
pub mod node;
pub mod table;
pub mod wire;

pub use mesh::LoopbackMesh;
pub use node::Node;
pub use table::{Table, TxTable, Wrap};
pub use wire::{CommandRequest, TxFinishRequest};
