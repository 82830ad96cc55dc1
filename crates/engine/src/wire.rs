//! Wire messages for cross-node coordination
//!
//! Two message families cross node boundaries: the finish request fanned
//! out at commit/rollback time, and per-command envelopes carrying one
//! state-machine command to the partition leader. Both are plain serde
//! types; the transport (loopback in-process here, an RPC stack in a real
//! deployment) moves them as bincode payloads.

use serde::{Deserialize, Serialize};
use tessera_core::{PartitionId, PartitionRef, TxId};
use tessera_replication::Command;

/// Finish request sent from the originating node to each enlisted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxFinishRequest {
    /// Transaction being finished
    pub tx_id: TxId,
    /// True for commit, false for rollback
    pub commit: bool,
    /// Partitions the transaction touched on the receiving node
    pub partitions: Vec<PartitionRef>,
}

/// One command addressed to a partition leader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target table
    pub table: String,
    /// Target partition within the table
    pub partition: PartitionId,
    /// The command to submit
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{NodeId, Row};

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    #[test]
    fn finish_request_roundtrips() {
        let req = TxFinishRequest {
            tx_id: tx(3),
            commit: true,
            partitions: vec![
                PartitionRef::new("accounts", PartitionId(0)),
                PartitionRef::new("accounts", PartitionId(2)),
            ],
        };
        let bytes = bincode::serialize(&req).unwrap();
        let back: TxFinishRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn command_request_roundtrips() {
        let req = CommandRequest {
            table: "accounts".to_string(),
            partition: PartitionId(1),
            command: Command::Upsert {
                tx_id: tx(7),
                row: Row::new("k", "v"),
            },
        };
        let bytes = bincode::serialize(&req).unwrap();
        let back: CommandRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(req, back);
        assert_eq!(back.command.tag(), "upsert");
        assert_eq!(back.command.tx_id(), tx(7));
    }
}
