//! Per-partition replica group
//!
//! A minimal stand-in for a consensus group that keeps the consensus-side
//! contract intact: write commands are appended to an ordered log and
//! handed to a single applier task in committed order; read commands are
//! served from the leader without a log append. Leader election and
//! membership are the consensus engine's business and do not appear here —
//! the group runs a single replica that is always the leader.
//!
//! The applier never blocks: each entry's apply runs on its own task, so a
//! command waiting on a lock does not stall the entries queued behind it.
//! Dispatch order (and therefore lock-queue arrival order) still follows
//! the log.

use crate::command::{Command, Response};
use crate::state_machine::StateMachine;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Error, PartitionId, Result};
use tokio::sync::{mpsc, oneshot};

/// One committed log entry
#[derive(Debug, Clone)]
struct LogEntry {
    index: u64,
    command: Command,
}

type Submission = (LogEntry, oneshot::Sender<Result<Response>>);

/// Ordered log plus dedicated applier for one partition
pub struct ReplicaGroup {
    partition: PartitionId,
    machine: Arc<StateMachine>,
    log: Mutex<Vec<LogEntry>>,
    last_applied: Arc<AtomicU64>,
    submissions: mpsc::UnboundedSender<Submission>,
    applier: tokio::task::JoinHandle<()>,
}

impl ReplicaGroup {
    /// Spawn the group's applier task and return the group
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(machine: Arc<StateMachine>) -> Arc<Self> {
        let partition = machine.partition();
        let (submissions, mut rx) = mpsc::unbounded_channel::<Submission>();
        let last_applied = Arc::new(AtomicU64::new(0));

        let applier_machine = Arc::clone(&machine);
        let applier_applied = Arc::clone(&last_applied);
        let applier = tokio::spawn(async move {
            while let Some((entry, respond)) = rx.recv().await {
                // Entries are dispatched strictly in log order; the apply
                // itself may suspend on a lock, so it runs on its own task
                // and the applier moves on to the next entry.
                applier_applied.store(entry.index, Ordering::SeqCst);
                let machine = Arc::clone(&applier_machine);
                tokio::spawn(async move {
                    let result = machine.apply(entry.command).await;
                    let _ = respond.send(result);
                });
            }
        });

        Arc::new(ReplicaGroup {
            partition,
            machine,
            log: Mutex::new(Vec::new()),
            last_applied,
            submissions,
            applier,
        })
    }

    /// The partition this group replicates
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The group's state machine
    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    /// Submit a command and await its response
    ///
    /// Read commands bypass the log (leader read); write and finish
    /// commands are appended, committed, and applied in order.
    pub async fn submit(&self, command: Command) -> Result<Response> {
        if command.is_read() {
            return self.machine.apply(command).await;
        }

        let (sx, rx) = oneshot::channel();
        {
            let mut log = self.log.lock();
            // Single-replica group: an appended entry is immediately
            // committed. A real consensus engine replaces this block with
            // its replication round.
            let entry = LogEntry {
                index: log.len() as u64 + 1,
                command,
            };
            log.push(entry.clone());
            self.submissions
                .send((entry, sx))
                .map_err(|_| Error::replication("partition applier has stopped"))?;
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::replication(
                "partition applier dropped the command before applying it",
            )),
        }
    }

    /// Index of the most recently dispatched log entry
    pub fn last_applied(&self) -> u64 {
        self.last_applied.load(Ordering::SeqCst)
    }

    /// Commands in the log strictly after `index`, in log order
    ///
    /// Snapshot-plus-tail recovery replays these on top of an installed
    /// snapshot.
    pub fn log_tail(&self, index: u64) -> Vec<Command> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.index > index)
            .map(|e| e.command.clone())
            .collect()
    }

    /// Serialise the partition state as of the last applied entry
    pub fn snapshot(&self, w: &mut impl Write) -> Result<()> {
        self.machine.snapshot(self.last_applied(), w)
    }

    /// Install a snapshot, discarding current state
    ///
    /// The log index resumes from the snapshot's last applied position.
    pub async fn install(&self, r: &mut impl Read) -> Result<u64> {
        let last_applied = self.machine.install(r).await?;
        self.last_applied.store(last_applied, Ordering::SeqCst);
        Ok(last_applied)
    }
}

impl Drop for ReplicaGroup {
    fn drop(&mut self) {
        // Partition teardown: stop the applier with the group.
        self.applier.abort();
    }
}
