//! Core types for the Tessera partition layer
//!
//! This crate defines the foundational vocabulary shared by every other
//! crate in the workspace:
//! - Transaction identity and lifecycle (`TxId`, `TxState`)
//! - Node and partition addressing (`NodeId`, `PartitionId`, `PartitionRef`)
//! - Opaque row data (`Key`, `Value`, `Row`)
//! - The unified `Error` type
//! - The engine configuration surface (`EngineConfig`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod tx;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use tx::{TxId, TxState};
pub use types::{Key, NodeId, PartitionId, PartitionRef, Row, Value};
