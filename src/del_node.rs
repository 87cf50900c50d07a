//! Membership removal engine (`del-node`).

use crate::client::Connector;
use crate::error::{RcctlError, Result};
use crate::outcome::{FanOutReport, Outcome};
use crate::topology::{normalize, Node, NodeAddress, Snapshot};
use serde::Serialize;
use tracing::{info, warn};

/// Ensure `target_id` exists and nothing replicates from it.
///
/// Returns the target node.
pub fn validate_removal<'s>(snapshot: &'s Snapshot, target_id: &str) -> Result<&'s Node> {
    let target = snapshot.find(target_id).ok_or_else(|| {
        RcctlError::Precondition(format!("node {} is not part of the cluster", target_id))
    })?;

    let dependents: Vec<&str> = snapshot
        .replicas_of(target_id)
        .map(|n| n.address.as_str())
        .collect();
    if !dependents.is_empty() {
        return Err(RcctlError::Precondition(format!(
            "node {} still has replicas ({}); reassign or remove them first",
            target_id,
            dependents.join(", ")
        )));
    }
    Ok(target)
}

/// Summary of a `del-node` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub target_id: String,
    pub target: String,
    /// One entry per remaining node.
    pub forgets: FanOutReport,
    pub reset: Outcome,
}

impl RemovalReport {
    pub fn is_complete_success(&self) -> bool {
        self.forgets.all_succeeded() && self.reset.is_success()
    }
}

pub struct MembershipRemovalEngine<'a> {
    connector: &'a dyn Connector,
}

impl<'a> MembershipRemovalEngine<'a> {
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self { connector }
    }

    /// Remove `target_id` from every other node's table, then reset it.
    ///
    /// Forget propagation and the reset are best effort; only discovery
    /// and the preconditions are fatal.
    pub async fn remove(&self, entry: &NodeAddress, target_id: &str) -> Result<RemovalReport> {
        let snapshot = {
            let mut client = self.connector.connect(entry).await?;
            normalize(&client.snapshot().await?)
        };
        let target = validate_removal(&snapshot, target_id)?;
        info!(node = %target_id, address = %target.address, "Removing node");

        let mut forgets = FanOutReport::new();
        for node in snapshot.nodes().filter(|n| n.node_id != target_id) {
            let result = self.forget_on(node, target_id).await;
            if let Err(e) = &result {
                warn!(node = %node.address, error = %e, "Forget failed");
            }
            forgets.record(&node.address, result);
        }

        let reset: Outcome = self.reset(target).await.into();
        if let Outcome::Failed(reason) = &reset {
            warn!(node = %target.address, reason = %reason, "Reset failed");
        }

        Ok(RemovalReport {
            target_id: target_id.to_string(),
            target: target.address.clone(),
            forgets,
            reset,
        })
    }

    async fn forget_on(&self, node: &Node, target_id: &str) -> Result<()> {
        let mut client = self.connector.connect(&node.endpoint()?).await?;
        client.forget(target_id).await
    }

    async fn reset(&self, target: &Node) -> Result<()> {
        let mut client = self.connector.connect(&target.endpoint()?).await?;
        client.reset().await
    }
}
