//! Addressing and row data types
//!
//! This module defines the identifiers used to address nodes and partitions,
//! and the opaque byte-oriented row representation. The partition layer
//! treats keys and values as uninterpreted byte sequences; schema and tuple
//! marshalling live outside the core.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a cluster node
///
/// A thin wrapper around a UUID v4. Node identity participates in the
/// transaction-id total order as the tie-breaker, so `NodeId` is `Ord`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a NodeId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw bytes of this NodeId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form; full uuid is noise in lock/transaction traces.
        let b = self.0.as_bytes();
        write!(f, "{:02x}{:02x}{:02x}{:02x}", b[0], b[1], b[2], b[3])
    }
}

/// Index of a partition within one table
///
/// Computed as `xxh3(key) % partition_count`; stable for the lifetime of
/// the table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Table-qualified partition address
///
/// Partition ids are scoped to a table, so cross-node coordination (tx
/// enlistment, finish fan-out) uses the qualified form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionRef {
    /// Name of the owning table
    pub table: String,
    /// Partition index within the table
    pub partition: PartitionId,
}

impl PartitionRef {
    /// Create a table-qualified partition address
    pub fn new(table: impl Into<String>, partition: PartitionId) -> Self {
        Self {
            table: table.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.partition)
    }
}

/// Opaque row key
///
/// Keys are compared byte-lexicographically. That order is also the
/// deterministic lock-acquisition order for batch operations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Wrap raw bytes as a key
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Byte view of the key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        // Big-endian so numeric order matches byte order.
        Self(n.to_be_bytes().to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "{}", s),
            _ => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Opaque row value
///
/// Values are compared byte-for-byte; `replace_exact` and `delete_exact`
/// rely on this equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Wrap raw bytes as a value
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Byte view of the value
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self(n.to_be_bytes().to_vec())
    }
}

impl Value {
    /// Interpret the value as a big-endian i64, if it is 8 bytes long
    ///
    /// Convenience for counter-style values; returns None otherwise.
    pub fn as_i64(&self) -> Option<i64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }
}

/// A key paired with its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row key
    pub key: Key,
    /// Row value
    pub value: Value,
}

impl Row {
    /// Create a row from a key and value
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_uniqueness() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_roundtrip_bytes() {
        let a = NodeId::from_bytes([7u8; 16]);
        assert_eq!(a.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn key_order_is_bytewise() {
        let a = Key::from("aaa");
        let b = Key::from("aab");
        let c = Key::from("b");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn numeric_key_order_matches_byte_order() {
        let k1 = Key::from(1u64);
        let k2 = Key::from(2u64);
        let k300 = Key::from(300u64);
        assert!(k1 < k2);
        assert!(k2 < k300);
    }

    #[test]
    fn value_equality_is_bytewise() {
        assert_eq!(Value::from("abc"), Value::from("abc"));
        assert_ne!(Value::from("abc"), Value::from("abd"));
    }

    #[test]
    fn value_i64_roundtrip() {
        let v = Value::from(-17i64);
        assert_eq!(v.as_i64(), Some(-17));
        assert_eq!(Value::from("short").as_i64(), None);
    }

    #[test]
    fn partition_ref_display() {
        let p = PartitionRef::new("accounts", PartitionId(3));
        assert_eq!(p.to_string(), "accounts:p3");
    }

    #[test]
    fn key_display_printable_and_binary() {
        assert_eq!(Key::from("user:1").to_string(), "user:1");
        assert_eq!(Key::new(vec![0x00, 0xff]).to_string(), "00ff");
    }

    #[test]
    fn serde_roundtrip() {
        let row = Row::new("k", "v");
        let bytes = bincode::serialize(&row).unwrap();
        let back: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(row, back);

        let p = PartitionRef::new("t", PartitionId(1));
        let bytes = bincode::serialize(&p).unwrap();
        let back: PartitionRef = bincode::deserialize(&bytes).unwrap();
        assert_eq!(p, back);
    }
}
