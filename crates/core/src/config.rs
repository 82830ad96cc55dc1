//! Engine configuration surface
//!
//! Exactly five options influence the core; everything else about a
//! deployment (listeners, discovery, storage paths) belongs to the outer
//! layers and never reaches this crate.

use serde::{Deserialize, Serialize};

/// Configuration for the partition layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default timeout applied to implicit operations, in milliseconds
    ///
    /// Elapsing translates to a rollback of the operation's transaction.
    pub default_query_timeout_ms: u64,

    /// Per-session memory quota, in bytes
    ///
    /// Accounted by the session layer; the core only carries the value.
    pub session_memory_quota_bytes: u64,

    /// Number of partitions each table is split into
    pub partition_count_per_table: u32,

    /// Replication factor for each table's partitions
    ///
    /// The in-process replica group runs a single replica; the value is
    /// forwarded to the consensus layer when one is plugged in.
    pub replication_factor_per_table: u32,

    /// Columns forming the affinity key
    ///
    /// Unused when keys are opaque byte sequences; retained so schema-aware
    /// callers can route by a column subset.
    pub affinity_columns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_query_timeout_ms: 3_000,
            session_memory_quota_bytes: 256 * 1024 * 1024,
            partition_count_per_table: 16,
            replication_factor_per_table: 1,
            affinity_columns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// A small configuration for tests: few partitions, short timeout
    pub fn for_testing() -> Self {
        Self {
            default_query_timeout_ms: 1_000,
            partition_count_per_table: 4,
            ..Self::default()
        }
    }
}
