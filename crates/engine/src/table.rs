//! Internal table: the partition router
//!
//! A table splits its key space across partitions by affinity hash:
//! `partition = xxh3(key_bytes) % partition_count`. Single-row operations
//! route to one partition's replica group; batch operations group rows by
//! partition, submit per-partition commands in parallel, and reassemble
//! results in input order.
//!
//! Before any operation under an explicit transaction, the table enlists
//! `(leader_node, partition)` into the transaction context; commit and
//! rollback consult that map. Without a transaction the table begins an
//! implicit one, runs the operation under the node's default query
//! timeout, and commits inline.

use crate::wire::CommandRequest;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::{TransactionManager, TxContext};
use tessera_core::{
    Error, Key, NodeId, PartitionId, PartitionRef, Result, Row, TxState, Value,
};
use tessera_replication::{Command, ReplicaGroup, Response};
use xxhash_rust::xxh3::xxh3_64;

/// A partitioned key-value table
pub struct Table {
    name: String,
    /// Leader address recorded at enlistment; the in-process groups are
    /// all led by the owning node
    node: NodeId,
    groups: Vec<Arc<ReplicaGroup>>,
    tx_manager: Arc<TransactionManager>,
    query_timeout: Duration,
}

impl Table {
    pub(crate) fn new(
        name: String,
        node: NodeId,
        groups: Vec<Arc<ReplicaGroup>>,
        tx_manager: Arc<TransactionManager>,
        query_timeout: Duration,
    ) -> Self {
        Table {
            name,
            node,
            groups,
            tx_manager,
            query_timeout,
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of partitions the key space is split across
    pub fn partition_count(&self) -> u32 {
        self.groups.len() as u32
    }

    /// Affinity routing: the partition owning `key`
    pub fn partition_of(&self, key: &Key) -> PartitionId {
        PartitionId((xxh3_64(key.as_bytes()) % self.groups.len() as u64) as u32)
    }

    /// The replica group for `partition`
    pub fn group(&self, partition: PartitionId) -> Option<&Arc<ReplicaGroup>> {
        self.groups.get(partition.0 as usize)
    }

    /// Execute a routed command envelope against this table
    pub(crate) async fn execute(&self, req: CommandRequest) -> Result<Response> {
        let group = self.group(req.partition).ok_or_else(|| {
            Error::replication(format!(
                "table {} has no partition {}",
                self.name, req.partition
            ))
        })?;
        group.submit(req.command).await
    }

    // =========================================================================
    // Single-row operations
    // =========================================================================

    /// Read the value for `key`
    pub async fn get(&self, key: &Key, tx: Option<&Arc<TxContext>>) -> Result<Option<Value>> {
        let cmd = |tx_id| Command::Get {
            tx_id,
            key: key.clone(),
        };
        self.one(key, cmd, tx).await?.into_row()
    }

    /// Write `row` unconditionally
    pub async fn upsert(&self, row: Row, tx: Option<&Arc<TxContext>>) -> Result<()> {
        let key = row.key.clone();
        let cmd = |tx_id| Command::Upsert { tx_id, row: row.clone() };
        self.one(&key, cmd, tx).await?;
        Ok(())
    }

    /// Write `row` iff the key is absent; true when written
    pub async fn insert(&self, row: Row, tx: Option<&Arc<TxContext>>) -> Result<bool> {
        let key = row.key.clone();
        let cmd = |tx_id| Command::Insert { tx_id, row: row.clone() };
        self.one(&key, cmd, tx).await?.into_applied()
    }

    /// Write `row` iff the key is present; true when written
    pub async fn replace(&self, row: Row, tx: Option<&Arc<TxContext>>) -> Result<bool> {
        let key = row.key.clone();
        let cmd = |tx_id| Command::Replace { tx_id, row: row.clone() };
        self.one(&key, cmd, tx).await?.into_applied()
    }

    /// Write iff the current value equals `expected`; true when written
    pub async fn replace_exact(
        &self,
        key: &Key,
        expected: &Value,
        new: Value,
        tx: Option<&Arc<TxContext>>,
    ) -> Result<bool> {
        let cmd = |tx_id| Command::ReplaceExact {
            tx_id,
            key: key.clone(),
            expected: expected.clone(),
            new: new.clone(),
        };
        self.one(key, cmd, tx).await?.into_applied()
    }

    /// Delete `key`; true when a value existed
    pub async fn delete(&self, key: &Key, tx: Option<&Arc<TxContext>>) -> Result<bool> {
        let cmd = |tx_id| Command::Delete {
            tx_id,
            key: key.clone(),
        };
        self.one(key, cmd, tx).await?.into_applied()
    }

    /// Delete iff the current value equals `row.value`; true when deleted
    pub async fn delete_exact(&self, row: &Row, tx: Option<&Arc<TxContext>>) -> Result<bool> {
        let cmd = |tx_id| Command::DeleteExact { tx_id, row: row.clone() };
        self.one(&row.key, cmd, tx).await?.into_applied()
    }

    /// Write `row` and return the previous value
    pub async fn get_and_upsert(
        &self,
        row: Row,
        tx: Option<&Arc<TxContext>>,
    ) -> Result<Option<Value>> {
        let key = row.key.clone();
        let cmd = |tx_id| Command::GetAndUpsert { tx_id, row: row.clone() };
        self.one(&key, cmd, tx).await?.into_row()
    }

    /// Replace iff present and return the previous value
    pub async fn get_and_replace(
        &self,
        row: Row,
        tx: Option<&Arc<TxContext>>,
    ) -> Result<Option<Value>> {
        let key = row.key.clone();
        let cmd = |tx_id| Command::GetAndReplace { tx_id, row: row.clone() };
        self.one(&key, cmd, tx).await?.into_row()
    }

    /// Delete iff present and return the previous value
    pub async fn get_and_delete(
        &self,
        key: &Key,
        tx: Option<&Arc<TxContext>>,
    ) -> Result<Option<Value>> {
        let cmd = |tx_id| Command::GetAndDelete {
            tx_id,
            key: key.clone(),
        };
        self.one(key, cmd, tx).await?.into_row()
    }

    // =========================================================================
    // Batch operations
    // =========================================================================

    /// Read many keys; results align with the input order
    pub async fn get_all(
        &self,
        keys: &[Key],
        tx: Option<&Arc<TxContext>>,
    ) -> Result<Vec<Option<Value>>> {
        match tx {
            Some(ctx) => self.get_all_in(keys, ctx).await,
            None => self.implicit(|ctx| async move { self.get_all_in(keys, &ctx).await }).await,
        }
    }

    /// Write many rows unconditionally
    pub async fn upsert_all(&self, rows: Vec<Row>, tx: Option<&Arc<TxContext>>) -> Result<()> {
        match tx {
            Some(ctx) => self.upsert_all_in(&rows, ctx).await,
            None => self.implicit(|ctx| async move { self.upsert_all_in(&rows, &ctx).await }).await,
        }
    }

    /// Insert many rows; returns how many keys were new
    pub async fn insert_all(&self, rows: Vec<Row>, tx: Option<&Arc<TxContext>>) -> Result<u64> {
        match tx {
            Some(ctx) => self.insert_all_in(&rows, ctx).await,
            None => self.implicit(|ctx| async move { self.insert_all_in(&rows, &ctx).await }).await,
        }
    }

    /// Delete many keys; returns how many existed
    pub async fn delete_all(&self, keys: &[Key], tx: Option<&Arc<TxContext>>) -> Result<u64> {
        match tx {
            Some(ctx) => self.delete_all_in(keys, ctx).await,
            None => self.implicit(|ctx| async move { self.delete_all_in(keys, &ctx).await }).await,
        }
    }

    /// Exact-delete many rows; returns how many matched
    pub async fn delete_exact_all(
        &self,
        rows: &[Row],
        tx: Option<&Arc<TxContext>>,
    ) -> Result<u64> {
        match tx {
            Some(ctx) => self.delete_exact_all_in(rows, ctx).await,
            None => self.implicit(|ctx| async move { self.delete_exact_all_in(rows, &ctx).await }).await,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn one<F>(
        &self,
        key: &Key,
        cmd: F,
        tx: Option<&Arc<TxContext>>,
    ) -> Result<Response>
    where
        F: Fn(tessera_core::TxId) -> Command,
    {
        match tx {
            Some(ctx) => {
                self.check_pending(ctx)?;
                let partition = self.partition_of(key);
                self.enlist(ctx, partition);
                self.groups[partition.0 as usize]
                    .submit(cmd(ctx.tx_id()))
                    .await
            }
            None => {
                self.implicit(|ctx| {
                    let command = cmd(ctx.tx_id());
                    let partition = self.partition_of(key);
                    self.enlist(&ctx, partition);
                    async move { self.groups[partition.0 as usize].submit(command).await }
                })
                .await
            }
        }
    }

    /// Begin an implicit transaction, run `f`, commit inline
    ///
    /// Errors and an elapsed default query timeout both roll the implicit
    /// transaction back and surface synchronously.
    async fn implicit<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<TxContext>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let ctx = self.tx_manager.begin();
        let work = async {
            let value = f(Arc::clone(&ctx)).await?;
            ctx.commit().await?;
            Ok(value)
        };
        match tokio::time::timeout(self.query_timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let _ = ctx.rollback().await;
                Err(e)
            }
            Err(_) => {
                tracing::debug!(tx_id = %ctx.tx_id(), "implicit operation timed out");
                let _ = ctx.rollback().await;
                Err(Error::transaction_aborted(ctx.tx_id()))
            }
        }
    }

    fn check_pending(&self, ctx: &TxContext) -> Result<()> {
        match ctx.state() {
            Some(TxState::Aborted) => Err(Error::transaction_aborted(ctx.tx_id())),
            Some(TxState::Committed) => Err(Error::internal(format!(
                "operation under already-committed transaction {}",
                ctx.tx_id()
            ))),
            Some(TxState::Pending) | None => Ok(()),
        }
    }

    fn enlist(&self, ctx: &TxContext, partition: PartitionId) {
        ctx.enlist(self.node, PartitionRef::new(self.name.clone(), partition));
    }

    /// Group item indices by owning partition, preserving input order
    fn route<'a, I>(&self, keys: I) -> BTreeMap<PartitionId, Vec<usize>>
    where
        I: Iterator<Item = &'a Key>,
    {
        let mut routed: BTreeMap<PartitionId, Vec<usize>> = BTreeMap::new();
        for (index, key) in keys.enumerate() {
            routed.entry(self.partition_of(key)).or_default().push(index);
        }
        routed
    }

    async fn fan_out<F>(
        &self,
        routed: BTreeMap<PartitionId, Vec<usize>>,
        ctx: &Arc<TxContext>,
        cmd: F,
    ) -> Result<Vec<(Vec<usize>, Response)>>
    where
        F: Fn(tessera_core::TxId, &[usize]) -> Command,
    {
        self.check_pending(ctx)?;
        for partition in routed.keys() {
            self.enlist(ctx, *partition);
        }
        let submits = routed.into_iter().map(|(partition, indices)| {
            let command = cmd(ctx.tx_id(), &indices);
            let group = Arc::clone(&self.groups[partition.0 as usize]);
            async move {
                let response = group.submit(command).await?;
                Ok::<_, Error>((indices, response))
            }
        });
        try_join_all(submits).await
    }

    async fn get_all_in(&self, keys: &[Key], ctx: &Arc<TxContext>) -> Result<Vec<Option<Value>>> {
        let routed = self.route(keys.iter());
        let parts = self
            .fan_out(routed, ctx, |tx_id, indices| Command::GetAll {
                tx_id,
                keys: indices.iter().map(|&i| keys[i].clone()).collect(),
            })
            .await?;

        let mut out = vec![None; keys.len()];
        for (indices, response) in parts {
            let values = response.into_rows()?;
            if values.len() != indices.len() {
                return Err(Error::internal(
                    "partition returned a misaligned batch response",
                ));
            }
            for (&index, value) in indices.iter().zip(values) {
                out[index] = value;
            }
        }
        Ok(out)
    }

    async fn upsert_all_in(&self, rows: &[Row], ctx: &Arc<TxContext>) -> Result<()> {
        let routed = self.route(rows.iter().map(|r| &r.key));
        self.fan_out(routed, ctx, |tx_id, indices| Command::UpsertAll {
            tx_id,
            rows: indices.iter().map(|&i| rows[i].clone()).collect(),
        })
        .await?;
        Ok(())
    }

    async fn insert_all_in(&self, rows: &[Row], ctx: &Arc<TxContext>) -> Result<u64> {
        let routed = self.route(rows.iter().map(|r| &r.key));
        let parts = self
            .fan_out(routed, ctx, |tx_id, indices| Command::InsertAll {
                tx_id,
                rows: indices.iter().map(|&i| rows[i].clone()).collect(),
            })
            .await?;
        let mut inserted = 0;
        for (_, response) in parts {
            inserted += response.into_count()?;
        }
        Ok(inserted)
    }

    async fn delete_all_in(&self, keys: &[Key], ctx: &Arc<TxContext>) -> Result<u64> {
        let routed = self.route(keys.iter());
        let parts = self
            .fan_out(routed, ctx, |tx_id, indices| Command::DeleteAll {
                tx_id,
                keys: indices.iter().map(|&i| keys[i].clone()).collect(),
            })
            .await?;
        let mut deleted = 0;
        for (_, response) in parts {
            deleted += response.into_count()?;
        }
        Ok(deleted)
    }

    async fn delete_exact_all_in(&self, rows: &[Row], ctx: &Arc<TxContext>) -> Result<u64> {
        let routed = self.route(rows.iter().map(|r| &r.key));
        let parts = self
            .fan_out(routed, ctx, |tx_id, indices| Command::DeleteExactAll {
                tx_id,
                rows: indices.iter().map(|&i| rows[i].clone()).collect(),
            })
            .await?;
        let mut deleted = 0;
        for (_, response) in parts {
            deleted += response.into_count()?;
        }
        Ok(deleted)
    }
}

/// A table view bound to one transaction
///
/// Every operation initiated through the view carries the bound
/// transaction; this is syntactic sugar over passing the context to each
/// call.
pub struct TxTable {
    table: Arc<Table>,
    tx: Arc<TxContext>,
}

/// Binds tables to a transaction context
pub trait Wrap {
    /// A view of `table` whose operations run under this transaction
    fn wrap(&self, table: &Arc<Table>) -> TxTable;
}

impl Wrap for Arc<TxContext> {
    fn wrap(&self, table: &Arc<Table>) -> TxTable {
        TxTable {
            table: Arc::clone(table),
            tx: Arc::clone(self),
        }
    }
}

impl TxTable {
    /// The bound transaction
    pub fn tx(&self) -> &Arc<TxContext> {
        &self.tx
    }

    /// Read the value for `key`
    pub async fn get(&self, key: &Key) -> Result<Option<Value>> {
        self.table.get(key, Some(&self.tx)).await
    }

    /// Write `row` unconditionally
    pub async fn upsert(&self, row: Row) -> Result<()> {
        self.table.upsert(row, Some(&self.tx)).await
    }

    /// Write `row` iff the key is absent
    pub async fn insert(&self, row: Row) -> Result<bool> {
        self.table.insert(row, Some(&self.tx)).await
    }

    /// Write `row` iff the key is present
    pub async fn replace(&self, row: Row) -> Result<bool> {
        self.table.replace(row, Some(&self.tx)).await
    }

    /// Write iff the current value equals `expected`
    pub async fn replace_exact(&self, key: &Key, expected: &Value, new: Value) -> Result<bool> {
        self.table.replace_exact(key, expected, new, Some(&self.tx)).await
    }

    /// Delete `key`
    pub async fn delete(&self, key: &Key) -> Result<bool> {
        self.table.delete(key, Some(&self.tx)).await
    }

    /// Delete iff the current value equals `row.value`
    pub async fn delete_exact(&self, row: &Row) -> Result<bool> {
        self.table.delete_exact(row, Some(&self.tx)).await
    }

    /// Write `row` and return the previous value
    pub async fn get_and_upsert(&self, row: Row) -> Result<Option<Value>> {
        self.table.get_and_upsert(row, Some(&self.tx)).await
    }

    /// Replace iff present and return the previous value
    pub async fn get_and_replace(&self, row: Row) -> Result<Option<Value>> {
        self.table.get_and_replace(row, Some(&self.tx)).await
    }

    /// Delete iff present and return the previous value
    pub async fn get_and_delete(&self, key: &Key) -> Result<Option<Value>> {
        self.table.get_and_delete(key, Some(&self.tx)).await
    }

    /// Read many keys; results align with the input order
    pub async fn get_all(&self, keys: &[Key]) -> Result<Vec<Option<Value>>> {
        self.table.get_all(keys, Some(&self.tx)).await
    }

    /// Write many rows unconditionally
    pub async fn upsert_all(&self, rows: Vec<Row>) -> Result<()> {
        self.table.upsert_all(rows, Some(&self.tx)).await
    }

    /// Insert many rows; returns how many keys were new
    pub async fn insert_all(&self, rows: Vec<Row>) -> Result<u64> {
        self.table.insert_all(rows, Some(&self.tx)).await
    }

    /// Delete many keys; returns how many existed
    pub async fn delete_all(&self, keys: &[Key]) -> Result<u64> {
        self.table.delete_all(keys, Some(&self.tx)).await
    }

    /// Exact-delete many rows; returns how many matched
    pub async fn delete_exact_all(&self, rows: &[Row]) -> Result<u64> {
        self.table.delete_exact_all(rows, Some(&self.tx)).await
    }
}
