//! Replication layer for Tessera
//!
//! A partition is a deterministic state machine over its row store,
//! consuming a log of key-value commands:
//! - `Command`/`Response`: the serializable instruction set, tagged read
//!   or write
//! - `StateMachine`: dispatches commands into the row store
//! - `ReplicaGroup`: ordered log plus a single applier task per partition;
//!   read commands are served from the leader without a log append
//! - snapshot save/load with CRC-framed records
//!
//! Leader election and membership belong to the consensus engine proper
//! and are out of scope; the group here runs a single replica with the
//! same applier discipline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod group;
pub mod snapshot;
pub mod state_machine;

pub use command::{Command, Response};
pub use group::ReplicaGroup;
pub use snapshot::SnapshotHeader;
pub use state_machine::StateMachine;
