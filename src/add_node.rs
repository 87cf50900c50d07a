//! Add a node to a running cluster (`add-node`).
//!
//! The existing node introduces the new one. Gossip then has to carry the
//! news to the rest of the cluster; by default a fixed settling delay is
//! used, and with [`JoinConfirmation::Poll`] the new node's own listing is
//! polled until it sees itself and its peers.

use crate::client::{ClusterClient, Connector};
use crate::config::ClusterConfig;
use crate::error::{RcctlError, Result};
use crate::topology::{NodeAddress, RawSnapshot, MYSELF_FLAG};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How to decide that the new node has joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinConfirmation {
    /// Sleep for the settle delay.
    FixedDelay(Duration),
    /// Poll the new node's listing up to `attempts` times.
    Poll { attempts: u32, interval: Duration },
}

impl JoinConfirmation {
    pub fn from_config(config: &ClusterConfig, wait_for_join: bool) -> Self {
        if wait_for_join {
            JoinConfirmation::Poll {
                attempts: config.join_poll_attempts,
                interval: config.join_poll_interval(),
            }
        } else {
            JoinConfirmation::FixedDelay(config.settle_delay())
        }
    }
}

/// Summary of an `add-node` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddNodeReport {
    pub address: NodeAddress,
    pub node_id: String,
    /// Master the node now replicates, if any.
    pub master_id: Option<String>,
}

/// True when the listing holds the node's own entry and the peers it needs:
/// `master_id` when given, otherwise any other node.
pub fn has_joined(listing: &RawSnapshot, master_id: Option<&str>) -> bool {
    let Some((_, me)) = listing.myself() else {
        return false;
    };
    let mut peers = listing
        .nodes
        .values()
        .filter(|n| !n.has_flag(MYSELF_FLAG) && n.node_id != me.node_id);
    match master_id {
        Some(id) => peers.any(|n| n.node_id == id),
        None => peers.next().is_some(),
    }
}

pub struct NodeJoiner<'a> {
    connector: &'a dyn Connector,
    confirmation: JoinConfirmation,
}

impl<'a> NodeJoiner<'a> {
    pub fn new(connector: &'a dyn Connector, confirmation: JoinConfirmation) -> Self {
        Self {
            connector,
            confirmation,
        }
    }

    /// Introduce `new_node` through `existing`, optionally attach it as a
    /// replica of `master_id`, and report its id. Every step is fatal.
    pub async fn add(
        &self,
        new_node: &NodeAddress,
        existing: &NodeAddress,
        master_id: Option<&str>,
    ) -> Result<AddNodeReport> {
        let mut existing_client = self.connector.connect(existing).await?;
        let mut new_client = self.connector.connect(new_node).await?;

        info!(node = %new_node, via = %existing, "Introducing node");
        existing_client
            .introduce(&new_node.host, new_node.port)
            .await?;

        self.confirm_join(new_client.as_mut(), master_id).await?;

        match master_id {
            Some(id) => {
                new_client.attach_replica(id).await?;
                info!(node = %new_node, master = %id, "Attached as replica");
            }
            None => info!(node = %new_node, "Joined as empty master"),
        }

        let node_id = new_client.my_id().await?;
        Ok(AddNodeReport {
            address: new_node.clone(),
            node_id,
            master_id: master_id.map(str::to_string),
        })
    }

    async fn confirm_join(
        &self,
        client: &mut dyn ClusterClient,
        master_id: Option<&str>,
    ) -> Result<()> {
        match self.confirmation {
            JoinConfirmation::FixedDelay(delay) => {
                debug!(?delay, "Waiting for membership to propagate");
                tokio::time::sleep(delay).await;
                Ok(())
            }
            JoinConfirmation::Poll { attempts, interval } => {
                for attempt in 1..=attempts {
                    match client.snapshot().await {
                        Ok(listing) if has_joined(&listing, master_id) => {
                            info!(attempt, "Node joined");
                            return Ok(());
                        }
                        Ok(_) => debug!(attempt, "Not joined yet"),
                        Err(e) => warn!(attempt, error = %e, "Listing failed while polling"),
                    }
                    if attempt < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }
                Err(RcctlError::Precondition(format!(
                    "{} did not join the cluster after {} attempts",
                    client.address(),
                    attempts
                )))
            }
        }
    }
}
