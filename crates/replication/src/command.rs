//! The replicated instruction set
//!
//! Every command carries the id of the acting transaction, implicit or
//! explicit. Reads may be served by the leader without a log append; write
//! and finish commands go through the log and are applied in committed
//! order. Responses mirror the store's typed results.

use serde::{Deserialize, Serialize};
use tessera_core::{Error, Key, Result, Row, TxId, Value};

/// A key-value command applied by the partition state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Read one key
    Get {
        /// Acting transaction
        tx_id: TxId,
        /// Key to read
        key: Key,
    },
    /// Read many keys; the response aligns with this order
    GetAll {
        /// Acting transaction
        tx_id: TxId,
        /// Keys to read
        keys: Vec<Key>,
    },
    /// Stage a write unconditionally
    Upsert {
        /// Acting transaction
        tx_id: TxId,
        /// Row to write
        row: Row,
    },
    /// Stage many writes unconditionally
    UpsertAll {
        /// Acting transaction
        tx_id: TxId,
        /// Rows to write
        rows: Vec<Row>,
    },
    /// Stage a write iff the key has no visible value
    Insert {
        /// Acting transaction
        tx_id: TxId,
        /// Row to insert
        row: Row,
    },
    /// Insert many rows; the response counts how many were new
    InsertAll {
        /// Acting transaction
        tx_id: TxId,
        /// Rows to insert
        rows: Vec<Row>,
    },
    /// Stage a write iff the key has a visible value
    Replace {
        /// Acting transaction
        tx_id: TxId,
        /// Replacement row
        row: Row,
    },
    /// Stage a write iff the visible value equals `expected`
    ReplaceExact {
        /// Acting transaction
        tx_id: TxId,
        /// Key to replace
        key: Key,
        /// Value the key must currently hold
        expected: Value,
        /// Replacement value
        new: Value,
    },
    /// Stage a delete
    Delete {
        /// Acting transaction
        tx_id: TxId,
        /// Key to delete
        key: Key,
    },
    /// Delete many keys; the response counts how many existed
    DeleteAll {
        /// Acting transaction
        tx_id: TxId,
        /// Keys to delete
        keys: Vec<Key>,
    },
    /// Stage a delete iff the visible value equals `row.value`
    DeleteExact {
        /// Acting transaction
        tx_id: TxId,
        /// Key and expected value
        row: Row,
    },
    /// Exact-delete many rows; the response counts how many matched
    DeleteExactAll {
        /// Acting transaction
        tx_id: TxId,
        /// Keys and expected values
        rows: Vec<Row>,
    },
    /// Stage a write and return the previous value
    GetAndUpsert {
        /// Acting transaction
        tx_id: TxId,
        /// Row to write
        row: Row,
    },
    /// Stage a write iff present and return the previous value
    GetAndReplace {
        /// Acting transaction
        tx_id: TxId,
        /// Replacement row
        row: Row,
    },
    /// Stage a delete iff present and return the previous value
    GetAndDelete {
        /// Acting transaction
        tx_id: TxId,
        /// Key to delete
        key: Key,
    },
    /// Promote the transaction's staged values and release its locks
    Commit {
        /// Transaction to commit
        tx_id: TxId,
    },
    /// Discard the transaction's staged values and release its locks
    Rollback {
        /// Transaction to roll back
        tx_id: TxId,
    },
}

impl Command {
    /// The transaction this command acts for
    pub fn tx_id(&self) -> TxId {
        match self {
            Command::Get { tx_id, .. }
            | Command::GetAll { tx_id, .. }
            | Command::Upsert { tx_id, .. }
            | Command::UpsertAll { tx_id, .. }
            | Command::Insert { tx_id, .. }
            | Command::InsertAll { tx_id, .. }
            | Command::Replace { tx_id, .. }
            | Command::ReplaceExact { tx_id, .. }
            | Command::Delete { tx_id, .. }
            | Command::DeleteAll { tx_id, .. }
            | Command::DeleteExact { tx_id, .. }
            | Command::DeleteExactAll { tx_id, .. }
            | Command::GetAndUpsert { tx_id, .. }
            | Command::GetAndReplace { tx_id, .. }
            | Command::GetAndDelete { tx_id, .. }
            | Command::Commit { tx_id }
            | Command::Rollback { tx_id } => *tx_id,
        }
    }

    /// True for commands the leader may serve without a log append
    pub fn is_read(&self) -> bool {
        matches!(self, Command::Get { .. } | Command::GetAll { .. })
    }

    /// True for the finish pair
    pub fn is_finish(&self) -> bool {
        matches!(self, Command::Commit { .. } | Command::Rollback { .. })
    }

    /// Short operation tag for traces
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::GetAll { .. } => "get_all",
            Command::Upsert { .. } => "upsert",
            Command::UpsertAll { .. } => "upsert_all",
            Command::Insert { .. } => "insert",
            Command::InsertAll { .. } => "insert_all",
            Command::Replace { .. } => "replace",
            Command::ReplaceExact { .. } => "replace_exact",
            Command::Delete { .. } => "delete",
            Command::DeleteAll { .. } => "delete_all",
            Command::DeleteExact { .. } => "delete_exact",
            Command::DeleteExactAll { .. } => "delete_exact_all",
            Command::GetAndUpsert { .. } => "get_and_upsert",
            Command::GetAndReplace { .. } => "get_and_replace",
            Command::GetAndDelete { .. } => "get_and_delete",
            Command::Commit { .. } => "commit",
            Command::Rollback { .. } => "rollback",
        }
    }
}

/// Typed result of applying one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Single-row result
    Row(Option<Value>),
    /// Multi-row result aligned with the request's key order
    Rows(Vec<Option<Value>>),
    /// Result of a conditional operation
    Applied(bool),
    /// How many rows a conditional batch affected
    Count(u64),
    /// No payload (writes, finish)
    None,
}

impl Response {
    /// Unwrap a single-row response
    pub fn into_row(self) -> Result<Option<Value>> {
        match self {
            Response::Row(v) => Ok(v),
            other => Err(Error::internal(format!(
                "expected a row response, got {other:?}"
            ))),
        }
    }

    /// Unwrap a multi-row response
    pub fn into_rows(self) -> Result<Vec<Option<Value>>> {
        match self {
            Response::Rows(v) => Ok(v),
            other => Err(Error::internal(format!(
                "expected a rows response, got {other:?}"
            ))),
        }
    }

    /// Unwrap a conditional response
    pub fn into_applied(self) -> Result<bool> {
        match self {
            Response::Applied(b) => Ok(b),
            other => Err(Error::internal(format!(
                "expected an applied response, got {other:?}"
            ))),
        }
    }

    /// Unwrap a batch-count response
    pub fn into_count(self) -> Result<u64> {
        match self {
            Response::Count(n) => Ok(n),
            other => Err(Error::internal(format!(
                "expected a count response, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::NodeId;

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    #[test]
    fn read_classification() {
        assert!(Command::Get { tx_id: tx(1), key: Key::from("k") }.is_read());
        assert!(Command::GetAll { tx_id: tx(1), keys: vec![] }.is_read());
        assert!(!Command::Upsert { tx_id: tx(1), row: Row::new("k", "v") }.is_read());
        assert!(!Command::Commit { tx_id: tx(1) }.is_read());
    }

    #[test]
    fn finish_classification() {
        assert!(Command::Commit { tx_id: tx(1) }.is_finish());
        assert!(Command::Rollback { tx_id: tx(1) }.is_finish());
        assert!(!Command::Delete { tx_id: tx(1), key: Key::from("k") }.is_finish());
    }

    #[test]
    fn tx_id_accessor_covers_all_variants() {
        let t = tx(9);
        for cmd in [
            Command::Get { tx_id: t, key: Key::from("k") },
            Command::InsertAll { tx_id: t, rows: vec![] },
            Command::ReplaceExact {
                tx_id: t,
                key: Key::from("k"),
                expected: Value::from("a"),
                new: Value::from("b"),
            },
            Command::GetAndDelete { tx_id: t, key: Key::from("k") },
            Command::Rollback { tx_id: t },
        ] {
            assert_eq!(cmd.tx_id(), t);
        }
    }

    #[test]
    fn response_unwrappers() {
        assert_eq!(Response::Row(None).into_row().unwrap(), None);
        assert_eq!(Response::Applied(true).into_applied().unwrap(), true);
        assert_eq!(Response::Count(3).into_count().unwrap(), 3);
        assert!(Response::None.into_row().is_err());
        assert!(Response::Row(None).into_rows().is_err());
    }

    #[test]
    fn commands_roundtrip_through_bincode() {
        let cmd = Command::UpsertAll {
            tx_id: tx(4),
            rows: vec![Row::new("a", "1"), Row::new("b", "2")],
        };
        let bytes = bincode::serialize(&cmd).unwrap();
        let back: Command = bincode::deserialize(&bytes).unwrap();
        assert_eq!(cmd, back);

        let resp = Response::Rows(vec![Some(Value::from("1")), None]);
        let bytes = bincode::serialize(&resp).unwrap();
        let back: Response = bincode::deserialize(&bytes).unwrap();
        assert_eq!(resp, back);
    }
}
