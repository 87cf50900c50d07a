//! Bootstrap planner (`create`).
//!
//! Planning is pure: [`plan_bootstrap`] checks the preconditions and decides
//! masters, replicas and slot ranges before any connection is opened.
//! [`BootstrapPlanner::create`] then drives the introductions, slot claims
//! and replica attachment.

use crate::client::{ClusterClient, Connector};
use crate::config::ClusterConfig;
use crate::error::{RcctlError, Result};
use crate::outcome::FanOutReport;
use crate::slots::{partition_slots, SlotRange};
use crate::topology::NodeAddress;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

/// Smallest node count a cluster can be bootstrapped from.
pub const MIN_CLUSTER_NODES: usize = 6;

/// A replica and the index of the master it will follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaAssignment {
    pub replica: NodeAddress,
    pub master_index: usize,
}

/// Decided layout of a new cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapPlan {
    /// First `masters.len()` input nodes, in input order.
    pub masters: Vec<NodeAddress>,
    /// Slot range per master, same order as `masters`.
    pub slot_ranges: Vec<SlotRange>,
    pub replicas: Vec<ReplicaAssignment>,
}

impl BootstrapPlan {
    pub fn master_for(&self, assignment: &ReplicaAssignment) -> &NodeAddress {
        &self.masters[assignment.master_index]
    }
}

/// Validate the inputs and lay out the cluster.
///
/// `masters = floor(nodes / (replicas_per_master + 1))`; replica `i` follows
/// master `i mod masters`.
pub fn plan_bootstrap(
    nodes: &[NodeAddress],
    replicas_per_master: usize,
    config: &ClusterConfig,
) -> Result<BootstrapPlan> {
    if nodes.len() < MIN_CLUSTER_NODES {
        return Err(RcctlError::Precondition(format!(
            "at least {} nodes are required, got {}",
            MIN_CLUSTER_NODES,
            nodes.len()
        )));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = nodes.iter().find(|n| !seen.insert(*n)) {
        return Err(RcctlError::Precondition(format!(
            "node {} is listed more than once",
            dup
        )));
    }

    let master_count = nodes.len() / (replicas_per_master + 1);
    if master_count == 0 {
        return Err(RcctlError::Precondition(format!(
            "{} nodes cannot hold {} replicas per master",
            nodes.len(),
            replicas_per_master
        )));
    }
    if master_count > config.total_slots as usize {
        return Err(RcctlError::Precondition(format!(
            "{} masters exceed the {} available slots",
            master_count, config.total_slots
        )));
    }

    let (masters, rest) = nodes.split_at(master_count);
    let replicas = rest
        .iter()
        .enumerate()
        .map(|(i, replica)| ReplicaAssignment {
            replica: replica.clone(),
            master_index: i % master_count,
        })
        .collect();

    Ok(BootstrapPlan {
        masters: masters.to_vec(),
        slot_ranges: partition_slots(config.total_slots, master_count),
        replicas,
    })
}

/// What happened to one master during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterOutcome {
    pub address: NodeAddress,
    pub node_id: String,
    pub slots: SlotRange,
    /// The node already owned its range; the claim was skipped as satisfied.
    pub already_assigned: bool,
}

/// Summary of a `create` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub masters: Vec<MasterOutcome>,
    /// One entry per replica, keyed by replica address.
    pub replicas: FanOutReport,
}

impl BootstrapReport {
    pub fn is_complete_success(&self) -> bool {
        self.replicas.all_succeeded()
    }
}

/// Drives the bootstrap protocol.
pub struct BootstrapPlanner<'a> {
    connector: &'a dyn Connector,
    config: ClusterConfig,
}

impl<'a> BootstrapPlanner<'a> {
    pub fn new(connector: &'a dyn Connector, config: ClusterConfig) -> Self {
        Self { connector, config }
    }

    /// Build a cluster from `nodes`.
    ///
    /// Introductions, slot claims and id lookups are fatal on failure.
    /// Replica attachment is best effort and reported per replica.
    pub async fn create(
        &self,
        nodes: &[NodeAddress],
        replicas_per_master: usize,
    ) -> Result<BootstrapReport> {
        let plan = plan_bootstrap(nodes, replicas_per_master, &self.config)?;
        info!(
            nodes = nodes.len(),
            masters = plan.masters.len(),
            replicas = plan.replicas.len(),
            "Creating cluster"
        );

        let mut clients: Vec<Box<dyn ClusterClient>> = Vec::with_capacity(nodes.len());
        for node in nodes {
            clients.push(self.connector.connect(node).await?);
        }

        self.introduce_all(&mut clients).await?;

        let master_count = plan.masters.len();
        let (master_clients, replica_clients) = clients.split_at_mut(master_count);

        let mut masters = Vec::with_capacity(master_count);
        for ((client, address), range) in master_clients
            .iter_mut()
            .zip(&plan.masters)
            .zip(&plan.slot_ranges)
        {
            let already_assigned = claim_slots(client.as_mut(), *range).await?;
            masters.push(MasterOutcome {
                address: address.clone(),
                node_id: String::new(),
                slots: *range,
                already_assigned,
            });
        }

        for (client, master) in master_clients.iter_mut().zip(masters.iter_mut()) {
            master.node_id = client.my_id().await?;
        }

        let mut replicas = FanOutReport::new();
        for (client, assignment) in replica_clients.iter_mut().zip(&plan.replicas) {
            let master = &masters[assignment.master_index];
            let target = assignment.replica.to_string();
            match client.attach_replica(&master.node_id).await {
                Ok(()) => {
                    info!(replica = %target, master = %master.address, "Replica attached");
                    replicas.record_success(target);
                }
                Err(e) => {
                    warn!(replica = %target, master = %master.address, error = %e, "Replica attach failed");
                    replicas.record_failure(target, e);
                }
            }
        }

        if !plan.replicas.is_empty() {
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        Ok(BootstrapReport { masters, replicas })
    }

    /// First node meets every other node, then wait for gossip.
    async fn introduce_all(&self, clients: &mut [Box<dyn ClusterClient>]) -> Result<()> {
        let Some((first, rest)) = clients.split_first_mut() else {
            return Ok(());
        };
        for peer in rest.iter() {
            let addr = peer.address();
            info!(from = %first.address(), peer = %addr, "Introducing node");
            first.introduce(&addr.host, addr.port).await?;
        }
        tokio::time::sleep(self.config.settle_delay()).await;
        Ok(())
    }
}

/// Claim `range`. Returns true when the slots already had an owner.
async fn claim_slots(client: &mut dyn ClusterClient, range: SlotRange) -> Result<bool> {
    let slots: Vec<u16> = range.iter().collect();
    match client.add_slots(&slots).await {
        Ok(()) => {
            info!(node = %client.address(), slots = %range, "Slots assigned");
            Ok(false)
        }
        Err(e) if e.is_slot_busy() => {
            info!(node = %client.address(), slots = %range, "Slots already assigned");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
