//! Remote cluster client.
//!
//! Every engine talks to store nodes through two seams:
//!
//! - [`ClusterClient`]: the cluster-administration primitives against one
//!   node over one connection
//! - [`Connector`]: opens a [`ClusterClient`] for an address
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  check / create / reshard / del-node / ...  │
//! └─────────────────────────────────────────────┘
//!                      │ &dyn Connector
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │  ClusterClient (one node, one connection)   │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │  RedisNodeClient (redis crate, tokio)       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Tests inject an in-memory cluster behind the same traits.

mod redis_client;

pub use redis_client::{RedisConnector, RedisNodeClient};

use crate::error::Result;
use crate::topology::{NodeAddress, RawSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// What a node returned for the listing call.
///
/// Depending on the backend a listing arrives either already structured or
/// as the raw `CLUSTER NODES` table. [`ClusterClient::snapshot`] resolves
/// both into a [`RawSnapshot`]; nothing downstream branches on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodesListing {
    Structured(RawSnapshot),
    Raw(String),
}

impl NodesListing {
    /// Resolve into the single snapshot type.
    pub fn into_snapshot(self) -> Result<RawSnapshot> {
        match self {
            NodesListing::Structured(snapshot) => Ok(snapshot),
            NodesListing::Raw(text) => RawSnapshot::parse_cluster_nodes(&text),
        }
    }
}

/// Cluster-administration primitives against a single store node.
#[async_trait]
pub trait ClusterClient: Send {
    /// Address this client is connected to.
    fn address(&self) -> &NodeAddress;

    async fn ping(&mut self) -> Result<()>;

    /// Add a peer to this node's membership view (`CLUSTER MEET`).
    async fn introduce(&mut self, host: &str, port: u16) -> Result<()>;

    /// Claim ownership of slots (`CLUSTER ADDSLOTS`). Slots that already
    /// have an owner fail with an error for which
    /// [`crate::error::RcctlError::is_slot_busy`] is true.
    async fn add_slots(&mut self, slots: &[u16]) -> Result<()>;

    /// This node's stable identifier (`CLUSTER MYID`).
    async fn my_id(&mut self) -> Result<String>;

    /// Make this node a replica of `master_id` (`CLUSTER REPLICATE`).
    async fn attach_replica(&mut self, master_id: &str) -> Result<()>;

    /// Full membership/slot/health view as seen by this node.
    async fn list_nodes(&mut self) -> Result<NodesListing>;

    /// Remove a node from this node's membership table (`CLUSTER FORGET`).
    async fn forget(&mut self, node_id: &str) -> Result<()>;

    /// Clear this node's own cluster state (`CLUSTER RESET`).
    async fn reset(&mut self) -> Result<()>;

    async fn set_slot_importing(&mut self, slot: u16, from_node_id: &str) -> Result<()>;

    async fn set_slot_migrating(&mut self, slot: u16, to_node_id: &str) -> Result<()>;

    async fn set_slot_owner(&mut self, slot: u16, node_id: &str) -> Result<()>;

    /// Up to `limit` keys currently stored in `slot` (`CLUSTER GETKEYSINSLOT`).
    async fn keys_in_slot(&mut self, slot: u16, limit: usize) -> Result<Vec<Bytes>>;

    /// Move one key to another node, blocking until acknowledged or
    /// `timeout` expires (`MIGRATE`).
    async fn relocate_key(&mut self, to: &NodeAddress, key: &[u8], timeout: Duration)
        -> Result<()>;

    /// Plain string write, used to seed test data.
    async fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Fetch the listing and resolve it into a [`RawSnapshot`].
    async fn snapshot(&mut self) -> Result<RawSnapshot> {
        self.list_nodes().await?.into_snapshot()
    }
}

/// Opens connections to store nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &NodeAddress) -> Result<Box<dyn ClusterClient>>;
}
