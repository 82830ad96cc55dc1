//! Error types for the Tessera partition layer
//!
//! One unified error enum covers the whole workspace. We use `thiserror`
//! for `Display` and `Error` impls, constructor helpers for the common
//! variants, and classification predicates for retry decisions.
//!
//! Propagation rules:
//! - `LockConflict` and `TransactionAborted` abort the current operation;
//!   the transaction stays pending until the caller finishes it, and after
//!   a failed operation rollback is the only legal finish.
//! - Finish-time failures (`Replication`) never reopen a terminal state.
//! - `Internal` and `Corruption` are fatal for the partition replica.

use crate::tx::TxId;
use crate::types::Key;
use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tessera partition layer
#[derive(Debug, Error)]
pub enum Error {
    /// Wound-wait rejected a lock request, or an upgrading reader was
    /// invalidated by an exclusive release
    ///
    /// The transaction may be retried from scratch; within the current
    /// transaction the operation is unrecoverable.
    #[error("lock conflict with {conflicting_tx}")]
    LockConflict {
        /// The transaction holding the conflicting lock
        conflicting_tx: TxId,
    },

    /// Operation invoked under a transaction that is already aborted
    #[error("transaction {tx_id} is aborted")]
    TransactionAborted {
        /// The aborted transaction
        tx_id: TxId,
    },

    /// Conditional read failed: the key has no committed value
    ///
    /// Distinguished from a null value in conditional operations only.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key
        key: Key,
    },

    /// Row bytes do not match the table schema (marshalling collaborator)
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// What did not line up
        message: String,
    },

    /// A column value has the wrong type (marshalling collaborator)
    #[error("invalid type: {message}")]
    InvalidType {
        /// What did not line up
        message: String,
    },

    /// A named column does not exist (marshalling collaborator)
    #[error("column not found: {column}")]
    ColumnNotFound {
        /// The missing column
        column: String,
    },

    /// The consensus layer could not commit within the configured window
    ///
    /// The transaction state is unchanged; retry is the caller's choice.
    #[error("replication error: {message}")]
    Replication {
        /// What failed
        message: String,
    },

    /// I/O error (snapshot streams)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure
    #[error("serialization error: {message}")]
    Serialization {
        /// What failed to encode or decode
        message: String,
    },

    /// Snapshot framing or checksum failure
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    /// Invariant violation; fatal for the partition replica
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

impl Error {
    /// Create a LockConflict error
    pub fn lock_conflict(conflicting_tx: TxId) -> Self {
        Error::LockConflict { conflicting_tx }
    }

    /// Create a TransactionAborted error
    pub fn transaction_aborted(tx_id: TxId) -> Self {
        Error::TransactionAborted { tx_id }
    }

    /// Create a NotFound error
    pub fn not_found(key: Key) -> Self {
        Error::NotFound { key }
    }

    /// Create a Replication error
    pub fn replication(message: impl Into<String>) -> Self {
        Error::Replication {
            message: message.into(),
        }
    }

    /// Create a Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// True for lock conflicts
    ///
    /// Used for retry logic: a conflicted transaction can be rolled back
    /// and re-run from scratch.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::LockConflict { .. })
    }

    /// True for errors a fresh transaction attempt may not hit again
    ///
    /// Covers lock conflicts, aborts observed mid-operation, and
    /// replication windows.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockConflict { .. }
                | Error::TransactionAborted { .. }
                | Error::Replication { .. }
        )
    }

    /// True for errors that indicate a bug or data damage
    ///
    /// These should be logged and investigated; the partition replica is
    /// not trustworthy after one.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Corruption { .. } | Error::Internal { .. })
    }

    /// True for marshalling-collaborator errors, propagated unchanged
    pub fn is_marshalling(&self) -> bool {
        matches!(
            self,
            Error::SchemaMismatch { .. }
                | Error::InvalidType { .. }
                | Error::ColumnNotFound { .. }
        )
    }

    /// The conflicting transaction, for lock conflicts
    pub fn conflicting_tx(&self) -> Option<TxId> {
        match self {
            Error::LockConflict { conflicting_tx } => Some(*conflicting_tx),
            _ => None,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    #[test]
    fn lock_conflict_classification() {
        let e = Error::lock_conflict(tx(5));
        assert!(e.is_conflict());
        assert!(e.is_retryable());
        assert!(!e.is_serious());
        assert_eq!(e.conflicting_tx(), Some(tx(5)));
    }

    #[test]
    fn aborted_is_retryable_not_conflict() {
        let e = Error::transaction_aborted(tx(2));
        assert!(!e.is_conflict());
        assert!(e.is_retryable());
    }

    #[test]
    fn serious_errors() {
        assert!(Error::internal("bad invariant").is_serious());
        assert!(Error::corruption("crc mismatch").is_serious());
        assert!(!Error::replication("window elapsed").is_serious());
    }

    #[test]
    fn marshalling_errors_propagate_unchanged() {
        let e = Error::ColumnNotFound {
            column: "balance".to_string(),
        };
        assert!(e.is_marshalling());
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("balance"));
    }

    #[test]
    fn display_forms() {
        let e = Error::lock_conflict(tx(9));
        assert!(e.to_string().contains("lock conflict"));
        let e = Error::not_found(Key::from("missing"));
        assert!(e.to_string().contains("missing"));
    }

    #[test]
    fn from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn from_bincode_error() {
        let bad = vec![0xFFu8; 3];
        let result: std::result::Result<String, bincode::Error> = bincode::deserialize(&bad);
        let e: Error = result.unwrap_err().into();
        assert!(matches!(e, Error::Serialization { .. }));
    }
}
