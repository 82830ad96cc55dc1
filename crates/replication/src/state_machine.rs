//! Partition state machine
//!
//! A pure dispatch from (command, store) to a typed response. The applier
//! must stay deterministic: no wall clock, no randomness, no map-iteration
//! order leaks into results. All ordering comes from the log and from the
//! lock manager's timestamp order; snapshot enumeration is key-sorted.

use crate::command::{Command, Response};
use crate::snapshot::{self, SnapshotContents};
use std::io::{Read, Write};
use std::sync::Arc;
use tessera_core::{Error, PartitionId, Result};
use tessera_storage::RowStore;

/// Deterministic command applier over one partition's row store
pub struct StateMachine {
    partition: PartitionId,
    store: Arc<RowStore>,
}

impl StateMachine {
    /// Create a state machine for `partition` over `store`
    pub fn new(partition: PartitionId, store: Arc<RowStore>) -> Self {
        StateMachine { partition, store }
    }

    /// The partition this machine applies for
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The underlying row store
    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    /// Apply one command and produce its typed response
    ///
    /// Suspends only on lock acquisition inside the store; the caller (the
    /// partition applier) runs each apply on its own task so the applier
    /// thread itself never blocks.
    pub async fn apply(&self, command: Command) -> Result<Response> {
        let tx = Some(command.tx_id());
        match command {
            Command::Get { key, .. } => {
                Ok(Response::Row(self.store.get(&key, tx).await?))
            }
            Command::GetAll { keys, .. } => {
                Ok(Response::Rows(self.store.get_all(&keys, tx).await?))
            }
            Command::Upsert { row, .. } => {
                self.store.upsert(row, tx).await?;
                Ok(Response::None)
            }
            Command::UpsertAll { rows, .. } => {
                self.store.upsert_all(rows, tx).await?;
                Ok(Response::None)
            }
            Command::Insert { row, .. } => {
                Ok(Response::Applied(self.store.insert(row, tx).await?))
            }
            Command::InsertAll { rows, .. } => {
                Ok(Response::Count(self.store.insert_all(rows, tx).await? as u64))
            }
            Command::Replace { row, .. } => {
                Ok(Response::Applied(self.store.replace(row, tx).await?))
            }
            Command::ReplaceExact {
                key, expected, new, ..
            } => Ok(Response::Applied(
                self.store.replace_exact(&key, &expected, new, tx).await?,
            )),
            Command::Delete { key, .. } => {
                Ok(Response::Applied(self.store.delete(&key, tx).await?))
            }
            Command::DeleteAll { keys, .. } => {
                Ok(Response::Count(self.store.delete_all(&keys, tx).await? as u64))
            }
            Command::DeleteExact { row, .. } => {
                Ok(Response::Applied(self.store.delete_exact(&row, tx).await?))
            }
            Command::DeleteExactAll { rows, .. } => Ok(Response::Count(
                self.store.delete_exact_all(&rows, tx).await? as u64,
            )),
            Command::GetAndUpsert { row, .. } => {
                Ok(Response::Row(self.store.get_and_upsert(row, tx).await?))
            }
            Command::GetAndReplace { row, .. } => {
                Ok(Response::Row(self.store.get_and_replace(row, tx).await?))
            }
            Command::GetAndDelete { key, .. } => {
                Ok(Response::Row(self.store.get_and_delete(&key, tx).await?))
            }
            Command::Commit { tx_id } => {
                self.store.commit(tx_id);
                Ok(Response::None)
            }
            Command::Rollback { tx_id } => {
                self.store.rollback(tx_id);
                Ok(Response::None)
            }
        }
    }

    /// Serialise committed state and pending staging to `w`
    pub fn snapshot(&self, last_applied_index: u64, w: &mut impl Write) -> Result<()> {
        snapshot::write_snapshot(&self.store, self.partition, last_applied_index, w)
    }

    /// Reload state from a snapshot stream, discarding in-memory state first
    ///
    /// Pending writers are re-staged under freshly acquired exclusive
    /// locks, so installation requires a quiescent partition. Returns the
    /// snapshot's last applied log index; replay resumes after it.
    pub async fn install(&self, r: &mut impl Read) -> Result<u64> {
        let SnapshotContents {
            header,
            rows,
            pending,
        } = snapshot::read_snapshot(r)?;
        if header.partition != self.partition {
            return Err(Error::internal(format!(
                "snapshot for {} installed into {}",
                header.partition, self.partition
            )));
        }
        self.store.clear();
        for (key, value) in rows {
            self.store.install_committed(key, value);
        }
        for (tx_id, entries) in pending {
            for (key, value) in entries {
                self.store.restage(tx_id, key, value).await?;
            }
        }
        tracing::debug!(
            partition = %self.partition,
            last_applied = header.last_applied_index,
            "snapshot installed"
        );
        Ok(header.last_applied_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tessera_concurrency::{LockManager, TxIdSource};
    use tessera_core::{Key, NodeId, Row, TxId, Value};

    struct SeqIds(AtomicU64, NodeId);

    impl TxIdSource for SeqIds {
        fn next_tx_id(&self) -> TxId {
            TxId::new(self.0.fetch_add(1, Ordering::SeqCst), self.1)
        }
    }

    fn machine() -> StateMachine {
        let ids = Arc::new(SeqIds(AtomicU64::new(1_000), NodeId::from_bytes([1; 16])));
        let store = Arc::new(RowStore::new(Arc::new(LockManager::new()), ids));
        StateMachine::new(PartitionId(0), store)
    }

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    #[tokio::test]
    async fn write_then_read_through_commands() {
        let sm = machine();
        let t = tx(1);

        let resp = sm
            .apply(Command::Upsert { tx_id: t, row: Row::new("k", "v") })
            .await
            .unwrap();
        assert_eq!(resp, Response::None);

        let resp = sm
            .apply(Command::Get { tx_id: t, key: Key::from("k") })
            .await
            .unwrap();
        assert_eq!(resp, Response::Row(Some(Value::from("v"))));

        sm.apply(Command::Commit { tx_id: t }).await.unwrap();
        assert!(sm.store().locks().is_quiescent());
    }

    #[tokio::test]
    async fn conditional_commands_report_applied() {
        let sm = machine();
        let t = tx(1);

        let applied = sm
            .apply(Command::Insert { tx_id: t, row: Row::new("k", "a") })
            .await
            .unwrap()
            .into_applied()
            .unwrap();
        assert!(applied);

        let applied = sm
            .apply(Command::Insert { tx_id: t, row: Row::new("k", "b") })
            .await
            .unwrap()
            .into_applied()
            .unwrap();
        assert!(!applied);

        let count = sm
            .apply(Command::DeleteAll {
                tx_id: t,
                keys: vec![Key::from("k"), Key::from("missing")],
            })
            .await
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 1);

        sm.apply(Command::Rollback { tx_id: t }).await.unwrap();
        assert!(sm.store().locks().is_quiescent());
    }

    #[tokio::test]
    async fn identical_logs_produce_identical_state() {
        let log = vec![
            Command::Upsert { tx_id: tx(1), row: Row::new("a", "1") },
            Command::Upsert { tx_id: tx(1), row: Row::new("b", "2") },
            Command::Commit { tx_id: tx(1) },
            Command::Delete { tx_id: tx(2), key: Key::from("a") },
            Command::Upsert { tx_id: tx(2), row: Row::new("c", "3") },
            Command::Commit { tx_id: tx(2) },
        ];

        let left = machine();
        let right = machine();
        for cmd in &log {
            left.apply(cmd.clone()).await.unwrap();
            right.apply(cmd.clone()).await.unwrap();
        }
        assert_eq!(left.store().committed_rows(), right.store().committed_rows());
    }

    #[tokio::test]
    async fn snapshot_roundtrips_committed_and_pending() {
        let sm = machine();
        sm.apply(Command::Upsert { tx_id: tx(1), row: Row::new("a", "1") })
            .await
            .unwrap();
        sm.apply(Command::Commit { tx_id: tx(1) }).await.unwrap();
        sm.apply(Command::Upsert { tx_id: tx(2), row: Row::new("b", "2") })
            .await
            .unwrap();

        let mut buf = Vec::new();
        sm.snapshot(7, &mut buf).unwrap();

        let restored = machine();
        let last_applied = restored.install(&mut buf.as_slice()).await.unwrap();
        assert_eq!(last_applied, 7);
        assert_eq!(
            restored.store().committed_rows(),
            sm.store().committed_rows()
        );
        assert_eq!(restored.store().staged_writes(), sm.store().staged_writes());

        // The re-staged transaction can still finish on the restored side.
        restored
            .apply(Command::Commit { tx_id: tx(2) })
            .await
            .unwrap();
        assert_eq!(restored.store().committed_len(), 2);
    }

    #[tokio::test]
    async fn install_rejects_foreign_partition() {
        let sm = machine();
        let mut buf = Vec::new();
        sm.snapshot(0, &mut buf).unwrap();

        let ids = Arc::new(SeqIds(AtomicU64::new(1_000), NodeId::from_bytes([1; 16])));
        let store = Arc::new(RowStore::new(Arc::new(LockManager::new()), ids));
        let other = StateMachine::new(PartitionId(9), store);
        assert!(other.install(&mut buf.as_slice()).await.is_err());
    }
}
