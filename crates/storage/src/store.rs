//! The versioned row store
//!
//! Every operation acquires its key's lock through the partition's
//! [`LockManager`] before touching the slot map, so per-slot mutation is
//! serialised by the exclusive lock and wound-wait ordering applies to
//! storage operations transparently. Batch variants lock in ascending key
//! order to keep multi-key acquisition deterministic.
//!
//! Conditional operations (`insert`, `replace`, `replace_exact`, `delete`,
//! `delete_exact`) evaluate against the transaction's own view: staging by
//! the same transaction counts, committed state otherwise. A second
//! `insert` of the same key inside one transaction therefore reports
//! false even though nothing is committed yet.
//!
//! When no transaction is supplied, the store begins an implicit one, runs
//! the single operation, and commits inline; errors roll the implicit
//! transaction back and surface synchronously.

use crate::slot::{PendingWrite, Slot};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tessera_core::{Key, Result, Row, TxId, Value};
use tessera_concurrency::{LockManager, TxIdSource};

/// Per-partition row store with uncommitted value staging
pub struct RowStore {
    slots: DashMap<Key, Slot>,
    /// Keys staged per transaction, so finish can enumerate its writes
    staged: DashMap<TxId, BTreeSet<Key>>,
    locks: Arc<LockManager>,
    ids: Arc<dyn TxIdSource>,
}

impl RowStore {
    /// Create a store acquiring locks through `locks` and drawing implicit
    /// transaction ids from `ids`
    pub fn new(locks: Arc<LockManager>, ids: Arc<dyn TxIdSource>) -> Self {
        RowStore {
            slots: DashMap::new(),
            staged: DashMap::new(),
            locks,
            ids,
        }
    }

    /// The lock manager this store acquires through
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    // =========================================================================
    // Single-row operations
    // =========================================================================

    /// Read the value visible to `tx`
    pub async fn get(&self, key: &Key, tx: Option<TxId>) -> Result<Option<Value>> {
        match tx {
            Some(t) => self.get_in(key, t).await,
            None => self.implicit(|t| self.get_in(key, t)).await,
        }
    }

    /// Stage a write unconditionally
    pub async fn upsert(&self, row: Row, tx: Option<TxId>) -> Result<()> {
        match tx {
            Some(t) => self.upsert_in(row, t).await,
            None => self.implicit(|t| self.upsert_in(row, t)).await,
        }
    }

    /// Stage a write iff the key has no visible value; true when staged
    pub async fn insert(&self, row: Row, tx: Option<TxId>) -> Result<bool> {
        match tx {
            Some(t) => self.insert_in(row, t).await,
            None => self.implicit(|t| self.insert_in(row, t)).await,
        }
    }

    /// Stage a write iff the key has a visible value; true when staged
    pub async fn replace(&self, row: Row, tx: Option<TxId>) -> Result<bool> {
        match tx {
            Some(t) => self.replace_in(row, t).await,
            None => self.implicit(|t| self.replace_in(row, t)).await,
        }
    }

    /// Stage a write iff the visible value equals `expected`, byte-for-byte
    pub async fn replace_exact(
        &self,
        key: &Key,
        expected: &Value,
        new: Value,
        tx: Option<TxId>,
    ) -> Result<bool> {
        match tx {
            Some(t) => self.replace_exact_in(key, expected, new, t).await,
            None => {
                self.implicit(|t| self.replace_exact_in(key, expected, new.clone(), t))
                    .await
            }
        }
    }

    /// Stage a delete; true when the key had a visible value
    pub async fn delete(&self, key: &Key, tx: Option<TxId>) -> Result<bool> {
        match tx {
            Some(t) => self.delete_in(key, t).await,
            None => self.implicit(|t| self.delete_in(key, t)).await,
        }
    }

    /// Stage a delete iff the visible value equals `row.value`
    pub async fn delete_exact(&self, row: &Row, tx: Option<TxId>) -> Result<bool> {
        match tx {
            Some(t) => self.delete_exact_in(row, t).await,
            None => self.implicit(|t| self.delete_exact_in(row, t)).await,
        }
    }

    /// Stage a write and return the previously visible value
    pub async fn get_and_upsert(&self, row: Row, tx: Option<TxId>) -> Result<Option<Value>> {
        match tx {
            Some(t) => self.get_and_upsert_in(row, t).await,
            None => self.implicit(|t| self.get_and_upsert_in(row.clone(), t)).await,
        }
    }

    /// Stage a write iff a value is visible; return the previous value
    pub async fn get_and_replace(&self, row: Row, tx: Option<TxId>) -> Result<Option<Value>> {
        match tx {
            Some(t) => self.get_and_replace_in(row, t).await,
            None => self.implicit(|t| self.get_and_replace_in(row.clone(), t)).await,
        }
    }

    /// Stage a delete iff a value is visible; return the previous value
    pub async fn get_and_delete(&self, key: &Key, tx: Option<TxId>) -> Result<Option<Value>> {
        match tx {
            Some(t) => self.get_and_delete_in(key, t).await,
            None => self.implicit(|t| self.get_and_delete_in(key, t)).await,
        }
    }

    // =========================================================================
    // Batch operations
    //
    // All batch variants acquire locks in ascending key order so that two
    // batches over overlapping key sets meet in a deterministic order and
    // wound-wait keeps its younger/older asymmetry.
    // =========================================================================

    /// Read many keys; results align with the input order
    pub async fn get_all(&self, keys: &[Key], tx: Option<TxId>) -> Result<Vec<Option<Value>>> {
        match tx {
            Some(t) => self.get_all_in(keys, t).await,
            None => self.implicit(|t| self.get_all_in(keys, t)).await,
        }
    }

    /// Stage many writes unconditionally
    pub async fn upsert_all(&self, rows: Vec<Row>, tx: Option<TxId>) -> Result<()> {
        match tx {
            Some(t) => self.upsert_all_in(&rows, t).await,
            None => self.implicit(|t| self.upsert_all_in(&rows, t)).await,
        }
    }

    /// Stage writes for keys without a visible value; returns how many
    pub async fn insert_all(&self, rows: Vec<Row>, tx: Option<TxId>) -> Result<usize> {
        match tx {
            Some(t) => self.insert_all_in(&rows, t).await,
            None => self.implicit(|t| self.insert_all_in(&rows, t)).await,
        }
    }

    /// Stage deletes for keys with a visible value; returns how many
    pub async fn delete_all(&self, keys: &[Key], tx: Option<TxId>) -> Result<usize> {
        match tx {
            Some(t) => self.delete_all_in(keys, t).await,
            None => self.implicit(|t| self.delete_all_in(keys, t)).await,
        }
    }

    /// Stage deletes where the visible value matches; returns how many
    pub async fn delete_exact_all(&self, rows: &[Row], tx: Option<TxId>) -> Result<usize> {
        match tx {
            Some(t) => self.delete_exact_all_in(rows, t).await,
            None => self.implicit(|t| self.delete_exact_all_in(rows, t)).await,
        }
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Promote everything `tx` staged into committed state and release its
    /// locks
    ///
    /// A staged delete erases the committed entry; slots left with neither
    /// committed value nor staging are removed from the map.
    pub fn commit(&self, tx: TxId) {
        if let Some((_, keys)) = self.staged.remove(&tx) {
            tracing::debug!(%tx, staged = keys.len(), "promoting staged rows");
            for key in keys {
                {
                    if let Some(mut slot) = self.slots.get_mut(&key) {
                        match slot.pending.take() {
                            Some(p) if p.writer == tx => slot.committed = p.value,
                            other => slot.pending = other,
                        }
                    }
                }
                self.slots.remove_if(&key, |_, s| s.is_vacant());
            }
        }
        self.locks.release_all(tx);
    }

    /// Discard everything `tx` staged and release its locks
    pub fn rollback(&self, tx: TxId) {
        if let Some((_, keys)) = self.staged.remove(&tx) {
            tracing::debug!(%tx, staged = keys.len(), "discarding staged rows");
            for key in keys {
                {
                    if let Some(mut slot) = self.slots.get_mut(&key) {
                        if matches!(&slot.pending, Some(p) if p.writer == tx) {
                            slot.pending = None;
                        }
                    }
                }
                self.slots.remove_if(&key, |_, s| s.is_vacant());
            }
        }
        self.locks.release_all(tx);
    }

    /// Keys currently staged by `tx`, in key order
    pub fn staged_keys(&self, tx: TxId) -> Vec<Key> {
        self.staged
            .get(&tx)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Snapshot support
    // =========================================================================

    /// All committed rows in ascending key order
    ///
    /// Tombstone-free: only keys with a committed value appear.
    pub fn committed_rows(&self) -> Vec<(Key, Value)> {
        let mut rows: Vec<(Key, Value)> = self
            .slots
            .iter()
            .filter_map(|e| e.committed.clone().map(|v| (e.key().clone(), v)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// All staged writes grouped per transaction, in (tx, key) order
    pub fn staged_writes(&self) -> Vec<(TxId, Vec<(Key, Option<Value>)>)> {
        let mut out: Vec<(TxId, Vec<(Key, Option<Value>)>)> = self
            .staged
            .iter()
            .map(|e| {
                let tx = *e.key();
                let entries = e
                    .value()
                    .iter()
                    .filter_map(|key| {
                        self.slots.get(key).and_then(|slot| match &slot.pending {
                            Some(p) if p.writer == tx => {
                                Some((key.clone(), p.value.clone()))
                            }
                            _ => None,
                        })
                    })
                    .collect();
                (tx, entries)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Discard every slot and staging record
    ///
    /// Used when a snapshot is about to be installed. Lock state is not
    /// touched; installation runs on a quiescent partition.
    pub fn clear(&self) {
        self.slots.clear();
        self.staged.clear();
    }

    /// Install a committed row directly, bypassing locks
    ///
    /// Replay-only entry point: the leader's lock acquisition already
    /// serialised conflicts, so snapshot load and follower replay install
    /// produced mutations as-is.
    pub fn install_committed(&self, key: Key, value: Value) {
        self.slots.entry(key).or_default().committed = Some(value);
    }

    /// Re-stage a pending write under its writer's exclusive lock
    ///
    /// Used by snapshot installation to restore in-flight transactions.
    pub async fn restage(&self, tx: TxId, key: Key, value: Option<Value>) -> Result<()> {
        self.locks.acquire_exclusive(&key, tx).await?;
        self.stage(tx, key, value);
        Ok(())
    }

    /// Number of keys with a committed value
    pub fn committed_len(&self) -> usize {
        self.slots.iter().filter(|e| e.committed.is_some()).count()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn implicit<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TxId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.ids.next_tx_id();
        match f(tx).await {
            Ok(value) => {
                self.commit(tx);
                Ok(value)
            }
            Err(e) => {
                self.rollback(tx);
                Err(e)
            }
        }
    }

    fn visible(&self, key: &Key, tx: TxId) -> Option<Value> {
        self.slots.get(key).and_then(|s| s.visible_to(tx).cloned())
    }

    fn stage(&self, tx: TxId, key: Key, value: Option<Value>) {
        {
            let mut slot = self.slots.entry(key.clone()).or_default();
            slot.pending = Some(PendingWrite { value, writer: tx });
        }
        self.staged.entry(tx).or_default().insert(key);
    }

    async fn lock_shared_sorted(&self, keys: &[Key], tx: TxId) -> Result<()> {
        let mut sorted: Vec<&Key> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        for key in sorted {
            self.locks.acquire_shared(key, tx).await?;
        }
        Ok(())
    }

    async fn lock_exclusive_sorted<'a, I>(&self, keys: I, tx: TxId) -> Result<()>
    where
        I: Iterator<Item = &'a Key>,
    {
        let mut sorted: Vec<&Key> = keys.collect();
        sorted.sort();
        sorted.dedup();
        for key in sorted {
            self.locks.acquire_exclusive(key, tx).await?;
        }
        Ok(())
    }

    async fn get_in(&self, key: &Key, tx: TxId) -> Result<Option<Value>> {
        self.locks.acquire_shared(key, tx).await?;
        Ok(self.visible(key, tx))
    }

    async fn upsert_in(&self, row: Row, tx: TxId) -> Result<()> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        self.stage(tx, row.key, Some(row.value));
        Ok(())
    }

    async fn insert_in(&self, row: Row, tx: TxId) -> Result<bool> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        if self.visible(&row.key, tx).is_some() {
            return Ok(false);
        }
        self.stage(tx, row.key, Some(row.value));
        Ok(true)
    }

    async fn replace_in(&self, row: Row, tx: TxId) -> Result<bool> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        if self.visible(&row.key, tx).is_none() {
            return Ok(false);
        }
        self.stage(tx, row.key, Some(row.value));
        Ok(true)
    }

    async fn replace_exact_in(
        &self,
        key: &Key,
        expected: &Value,
        new: Value,
        tx: TxId,
    ) -> Result<bool> {
        self.locks.acquire_exclusive(key, tx).await?;
        if self.visible(key, tx).as_ref() != Some(expected) {
            return Ok(false);
        }
        self.stage(tx, key.clone(), Some(new));
        Ok(true)
    }

    async fn delete_in(&self, key: &Key, tx: TxId) -> Result<bool> {
        self.locks.acquire_exclusive(key, tx).await?;
        if self.visible(key, tx).is_none() {
            return Ok(false);
        }
        self.stage(tx, key.clone(), None);
        Ok(true)
    }

    async fn delete_exact_in(&self, row: &Row, tx: TxId) -> Result<bool> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        if self.visible(&row.key, tx).as_ref() != Some(&row.value) {
            return Ok(false);
        }
        self.stage(tx, row.key.clone(), None);
        Ok(true)
    }

    async fn get_and_upsert_in(&self, row: Row, tx: TxId) -> Result<Option<Value>> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        let previous = self.visible(&row.key, tx);
        self.stage(tx, row.key, Some(row.value));
        Ok(previous)
    }

    async fn get_and_replace_in(&self, row: Row, tx: TxId) -> Result<Option<Value>> {
        self.locks.acquire_exclusive(&row.key, tx).await?;
        let previous = self.visible(&row.key, tx);
        if previous.is_some() {
            self.stage(tx, row.key, Some(row.value));
        }
        Ok(previous)
    }

    async fn get_and_delete_in(&self, key: &Key, tx: TxId) -> Result<Option<Value>> {
        self.locks.acquire_exclusive(key, tx).await?;
        let previous = self.visible(key, tx);
        if previous.is_some() {
            self.stage(tx, key.clone(), None);
        }
        Ok(previous)
    }

    async fn get_all_in(&self, keys: &[Key], tx: TxId) -> Result<Vec<Option<Value>>> {
        self.lock_shared_sorted(keys, tx).await?;
        Ok(keys.iter().map(|k| self.visible(k, tx)).collect())
    }

    async fn upsert_all_in(&self, rows: &[Row], tx: TxId) -> Result<()> {
        self.lock_exclusive_sorted(rows.iter().map(|r| &r.key), tx).await?;
        for row in rows {
            self.stage(tx, row.key.clone(), Some(row.value.clone()));
        }
        Ok(())
    }

    async fn insert_all_in(&self, rows: &[Row], tx: TxId) -> Result<usize> {
        self.lock_exclusive_sorted(rows.iter().map(|r| &r.key), tx).await?;
        let mut inserted = 0;
        for row in rows {
            if self.visible(&row.key, tx).is_none() {
                self.stage(tx, row.key.clone(), Some(row.value.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn delete_all_in(&self, keys: &[Key], tx: TxId) -> Result<usize> {
        self.lock_exclusive_sorted(keys.iter(), tx).await?;
        let mut deleted = 0;
        for key in keys {
            if self.visible(key, tx).is_some() {
                self.stage(tx, key.clone(), None);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_exact_all_in(&self, rows: &[Row], tx: TxId) -> Result<usize> {
        self.lock_exclusive_sorted(rows.iter().map(|r| &r.key), tx).await?;
        let mut deleted = 0;
        for row in rows {
            if self.visible(&row.key, tx).as_ref() == Some(&row.value) {
                self.stage(tx, row.key.clone(), None);
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tessera_core::NodeId;

    struct SeqIds {
        next: AtomicU64,
        node: NodeId,
    }

    impl SeqIds {
        fn new() -> Arc<Self> {
            Arc::new(SeqIds {
                // Leave room below for explicitly numbered test transactions.
                next: AtomicU64::new(1_000),
                node: NodeId::from_bytes([1; 16]),
            })
        }
    }

    impl TxIdSource for SeqIds {
        fn next_tx_id(&self) -> TxId {
            TxId::new(self.next.fetch_add(1, Ordering::SeqCst), self.node)
        }
    }

    fn store() -> RowStore {
        RowStore::new(Arc::new(LockManager::new()), SeqIds::new())
    }

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    #[tokio::test]
    async fn implicit_upsert_then_get() {
        let store = store();
        store.upsert(Row::new("k", "v"), None).await.unwrap();
        assert_eq!(store.get(&Key::from("k"), None).await.unwrap(), Some(Value::from("v")));
        // Implicit operations leave no lock residue.
        assert!(store.locks().is_quiescent());
    }

    #[tokio::test]
    async fn staging_is_writer_private() {
        let store = store();
        store.upsert(Row::new("k", "committed"), None).await.unwrap();

        let t1 = tx(1);
        store.upsert(Row::new("k", "staged"), Some(t1)).await.unwrap();
        assert_eq!(
            store.get(&Key::from("k"), Some(t1)).await.unwrap(),
            Some(Value::from("staged"))
        );

        store.commit(t1);
        assert_eq!(
            store.get(&Key::from("k"), None).await.unwrap(),
            Some(Value::from("staged"))
        );
    }

    #[tokio::test]
    async fn rollback_discards_staging() {
        let store = store();
        store.upsert(Row::new("k", "committed"), None).await.unwrap();

        let t1 = tx(1);
        store.upsert(Row::new("k", "staged"), Some(t1)).await.unwrap();
        store.rollback(t1);

        assert_eq!(
            store.get(&Key::from("k"), None).await.unwrap(),
            Some(Value::from("committed"))
        );
        assert!(store.locks().is_quiescent());
    }

    #[tokio::test]
    async fn insert_respects_own_staging() {
        let store = store();
        let t1 = tx(1);
        assert!(store.insert(Row::new("k", "a"), Some(t1)).await.unwrap());
        // Second insert in the same transaction sees the first staging.
        assert!(!store.insert(Row::new("k", "b"), Some(t1)).await.unwrap());
        store.commit(t1);
        assert_eq!(store.get(&Key::from("k"), None).await.unwrap(), Some(Value::from("a")));
    }

    #[tokio::test]
    async fn replace_only_when_present() {
        let store = store();
        let t1 = tx(1);
        assert!(!store.replace(Row::new("k", "a"), Some(t1)).await.unwrap());
        store.commit(t1);

        store.upsert(Row::new("k", "a"), None).await.unwrap();
        let t2 = tx(2);
        assert!(store.replace(Row::new("k", "b"), Some(t2)).await.unwrap());
        store.commit(t2);
        assert_eq!(store.get(&Key::from("k"), None).await.unwrap(), Some(Value::from("b")));
    }

    #[tokio::test]
    async fn exact_variants_compare_bytes() {
        let store = store();
        store.upsert(Row::new("k", "a"), None).await.unwrap();

        let t1 = tx(1);
        let k = Key::from("k");
        assert!(!store
            .replace_exact(&k, &Value::from("wrong"), Value::from("b"), Some(t1))
            .await
            .unwrap());
        assert!(store
            .replace_exact(&k, &Value::from("a"), Value::from("b"), Some(t1))
            .await
            .unwrap());
        // The staged "b" is now the visible value for this transaction.
        assert!(!store
            .delete_exact(&Row::new("k", "a"), Some(t1))
            .await
            .unwrap());
        assert!(store
            .delete_exact(&Row::new("k", "b"), Some(t1))
            .await
            .unwrap());
        store.commit(t1);
        assert_eq!(store.get(&k, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_erases_committed_entry() {
        let store = store();
        store.upsert(Row::new("k", "a"), None).await.unwrap();
        let t1 = tx(1);
        assert!(store.delete(&Key::from("k"), Some(t1)).await.unwrap());
        store.commit(t1);
        assert_eq!(store.get(&Key::from("k"), None).await.unwrap(), None);
        assert_eq!(store.committed_len(), 0);
    }

    #[tokio::test]
    async fn delete_absent_reports_false() {
        let store = store();
        let t1 = tx(1);
        assert!(!store.delete(&Key::from("nope"), Some(t1)).await.unwrap());
        store.commit(t1);
        assert!(store.locks().is_quiescent());
    }

    #[tokio::test]
    async fn get_and_variants_return_previous() {
        let store = store();
        store.upsert(Row::new("k", "a"), None).await.unwrap();

        let t1 = tx(1);
        assert_eq!(
            store.get_and_upsert(Row::new("k", "b"), Some(t1)).await.unwrap(),
            Some(Value::from("a"))
        );
        assert_eq!(
            store.get_and_replace(Row::new("k", "c"), Some(t1)).await.unwrap(),
            Some(Value::from("b"))
        );
        assert_eq!(
            store.get_and_delete(&Key::from("k"), Some(t1)).await.unwrap(),
            Some(Value::from("c"))
        );
        assert_eq!(store.get(&Key::from("k"), Some(t1)).await.unwrap(), None);
        store.rollback(t1);
        assert_eq!(store.get(&Key::from("k"), None).await.unwrap(), Some(Value::from("a")));
    }

    #[tokio::test]
    async fn get_and_replace_absent_stages_nothing() {
        let store = store();
        let t1 = tx(1);
        assert_eq!(
            store.get_and_replace(Row::new("k", "v"), Some(t1)).await.unwrap(),
            None
        );
        assert!(store.staged_keys(t1).is_empty());
        store.commit(t1);
    }

    #[tokio::test]
    async fn batch_results_align_with_input_order() {
        let store = store();
        store.upsert(Row::new("b", "2"), None).await.unwrap();
        store.upsert(Row::new("d", "4"), None).await.unwrap();

        let keys = [Key::from("d"), Key::from("a"), Key::from("b")];
        let got = store.get_all(&keys, None).await.unwrap();
        assert_eq!(
            got,
            vec![Some(Value::from("4")), None, Some(Value::from("2"))]
        );
    }

    #[tokio::test]
    async fn insert_all_counts_new_keys_only() {
        let store = store();
        store.upsert(Row::new("a", "old"), None).await.unwrap();

        let t1 = tx(1);
        let rows = vec![
            Row::new("a", "x"),
            Row::new("b", "y"),
            Row::new("c", "z"),
        ];
        assert_eq!(store.insert_all(rows, Some(t1)).await.unwrap(), 2);
        store.commit(t1);
        assert_eq!(store.get(&Key::from("a"), None).await.unwrap(), Some(Value::from("old")));
        assert_eq!(store.get(&Key::from("b"), None).await.unwrap(), Some(Value::from("y")));
    }

    #[tokio::test]
    async fn delete_all_and_exact_all_count() {
        let store = store();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store.upsert(Row::new(k, v), None).await.unwrap();
        }

        let t1 = tx(1);
        let deleted = store
            .delete_all(&[Key::from("a"), Key::from("nope")], Some(t1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        let deleted = store
            .delete_exact_all(&[Row::new("b", "wrong"), Row::new("c", "3")], Some(t1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        store.commit(t1);
        assert_eq!(store.committed_len(), 1);
    }

    #[tokio::test]
    async fn wound_wait_applies_to_store_operations() {
        let store = store();
        store.upsert(Row::new("k", "0"), None).await.unwrap();

        let older = tx(1);
        let younger = tx(2);
        // Younger stages first; the older write is wounded.
        store.upsert(Row::new("k", "young"), Some(younger)).await.unwrap();
        let err = store.upsert(Row::new("k", "old"), Some(older)).await.unwrap_err();
        assert!(err.is_conflict());

        store.commit(younger);
        store.rollback(older);
        assert_eq!(
            store.get(&Key::from("k"), None).await.unwrap(),
            Some(Value::from("young"))
        );
    }

    #[tokio::test]
    async fn staged_enumeration_for_snapshots() {
        let store = store();
        store.upsert(Row::new("a", "1"), None).await.unwrap();

        let t1 = tx(1);
        store.upsert(Row::new("b", "2"), Some(t1)).await.unwrap();
        store.delete(&Key::from("a"), Some(t1)).await.unwrap();

        assert_eq!(store.staged_keys(t1), vec![Key::from("a"), Key::from("b")]);
        let staged = store.staged_writes();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].0, t1);
        assert_eq!(
            staged[0].1,
            vec![
                (Key::from("a"), None),
                (Key::from("b"), Some(Value::from("2"))),
            ]
        );

        let committed = store.committed_rows();
        assert_eq!(committed, vec![(Key::from("a"), Value::from("1"))]);
        store.rollback(t1);
    }
}
