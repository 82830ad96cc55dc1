//! Loopback transport connecting in-process nodes
//!
//! Stands in for the RPC stack: nodes register themselves, and finish
//! requests or command envelopes addressed by `NodeId` are delivered by
//! direct call. The mesh holds nodes weakly so dropping a node removes it
//! from the cluster.

use crate::node::Node;
use crate::wire::{CommandRequest, TxFinishRequest};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Weak};
use tessera_concurrency::FinishDispatch;
use tessera_core::{Error, NodeId, PartitionRef, Result, TxId};
use tessera_replication::Response;

/// In-process node registry and transport
#[derive(Default)]
pub struct LoopbackMesh {
    nodes: DashMap<NodeId, Weak<Node>>,
}

impl LoopbackMesh {
    /// Create an empty mesh
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackMesh::default())
    }

    /// Register `node` as reachable
    pub fn register(&self, node: &Arc<Node>) {
        self.nodes.insert(node.id(), Arc::downgrade(node));
    }

    /// Resolve a node address
    pub fn lookup(&self, node: NodeId) -> Result<Arc<Node>> {
        self.nodes
            .get(&node)
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| Error::replication(format!("unknown node {node}")))
    }

    /// Deliver a command envelope to `node` and await the typed response
    pub async fn submit(&self, node: NodeId, req: CommandRequest) -> Result<Response> {
        self.lookup(node)?.execute(req).await
    }
}

impl FinishDispatch for LoopbackMesh {
    fn dispatch_finish(
        &self,
        node: NodeId,
        tx_id: TxId,
        commit: bool,
        partitions: Vec<PartitionRef>,
    ) -> BoxFuture<'static, Result<()>> {
        let target = self.nodes.get(&node).and_then(|weak| weak.upgrade());
        let req = TxFinishRequest {
            tx_id,
            commit,
            partitions,
        };
        async move {
            match target {
                Some(node) => node.apply_finish(req).await,
                None => Err(Error::replication(format!(
                    "finish for {tx_id} addressed to unknown node {node}"
                ))),
            }
        }
        .boxed()
    }
}
