//! Consistency checker.
//!
//! A cluster is looked at from three angles:
//!
//! 1. slot coverage: the union of all master slots must be the full space
//! 2. link health: every node must report `connected`
//! 3. agreement: every node, asked independently, must report the same
//!    normalized view as the reference node
//!
//! On top of that the report carries slots left importing/migrating by an
//! interrupted reshard and replicas whose master is not in the snapshot.
//! None of these findings is an error; they are fields of [`CheckReport`].

use crate::client::Connector;
use crate::error::Result;
use crate::outcome::FanOutReport;
use crate::topology::{normalize, NodeAddress, OpenSlot, Snapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of the slot coverage check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub total_slots: u16,
    /// Number of slots no master owns.
    pub missing: usize,
}

impl CoverageReport {
    pub fn passed(&self) -> bool {
        self.missing == 0
    }
}

/// Result of the link health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    /// Addresses of nodes reported as not connected.
    pub disconnected: Vec<String>,
}

impl LinkReport {
    pub fn passed(&self) -> bool {
        self.disconnected.is_empty()
    }
}

/// Result of the cross-node agreement check. One probe per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgreementReport {
    pub probes: FanOutReport,
}

impl AgreementReport {
    pub fn passed(&self) -> bool {
        self.probes.all_succeeded()
    }

    /// Nodes whose view differs from the reference, or that could not be
    /// asked.
    pub fn inconsistent(&self) -> Vec<&str> {
        self.probes.failed()
    }
}

/// A transitional slot and the node that reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenSlotFinding {
    pub reporter: String,
    #[serde(flatten)]
    pub slot: OpenSlot,
}

/// Everything `check` found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub reference: String,
    pub node_count: usize,
    pub coverage: CoverageReport,
    pub links: LinkReport,
    pub agreement: AgreementReport,
    pub open_slots: Vec<OpenSlotFinding>,
    pub orphaned_replicas: Vec<String>,
}

impl CheckReport {
    pub fn is_healthy(&self) -> bool {
        self.coverage.passed()
            && self.links.passed()
            && self.agreement.passed()
            && self.open_slots.is_empty()
            && self.orphaned_replicas.is_empty()
    }
}

/// Count the slots in `[0, total_slots)` that no master owns.
pub fn check_slot_coverage(snapshot: &Snapshot, total_slots: u16) -> CoverageReport {
    let mut covered = vec![false; total_slots as usize];
    for master in snapshot.masters() {
        for range in master.slot_ranges() {
            for slot in range.iter().filter(|s| *s < total_slots) {
                covered[slot as usize] = true;
            }
        }
    }
    CoverageReport {
        total_slots,
        missing: covered.iter().filter(|c| !**c).count(),
    }
}

pub fn check_links(snapshot: &Snapshot) -> LinkReport {
    LinkReport {
        disconnected: snapshot
            .nodes()
            .filter(|n| !n.connected)
            .map(|n| n.address.clone())
            .collect(),
    }
}

/// Replicas whose `master_id` is missing or does not name a master in the
/// snapshot.
pub fn find_orphaned_replicas(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .nodes()
        .filter(|n| !n.is_master())
        .filter(|n| match n.master_id.as_deref() {
            Some(id) => !snapshot.find(id).is_some_and(|m| m.is_master()),
            None => n.has_flag("slave") || n.has_flag("replica"),
        })
        .map(|n| n.address.clone())
        .collect()
}

/// Runs the checks against a live cluster.
pub struct ConsistencyChecker<'a> {
    connector: &'a dyn Connector,
    total_slots: u16,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(connector: &'a dyn Connector, total_slots: u16) -> Self {
        Self {
            connector,
            total_slots,
        }
    }

    /// Ask every node in `reference` for its own view and compare.
    ///
    /// Unreachable nodes and nodes whose listing fails count as
    /// inconsistent.
    pub async fn check_agreement(&self, reference: &Snapshot) -> AgreementReport {
        let mut probes = FanOutReport::new();
        for node in reference.nodes() {
            match self.fetch_view(&node.address).await {
                Ok(view) if &view == reference => {
                    debug!(node = %node.address, "View agrees");
                    probes.record_success(&node.address);
                }
                Ok(_) => {
                    warn!(node = %node.address, "View differs from reference");
                    probes.record_failure(&node.address, "view differs from reference");
                }
                Err(e) => {
                    warn!(node = %node.address, error = %e, "Could not fetch view");
                    probes.record_failure(&node.address, e);
                }
            }
        }
        AgreementReport { probes }
    }

    async fn fetch_view(&self, address: &str) -> Result<Snapshot> {
        let endpoint: NodeAddress = address.parse()?;
        let mut client = self.connector.connect(&endpoint).await?;
        let raw = client.snapshot().await?;
        Ok(normalize(&raw))
    }

    /// Run every check using `entry` as the reference node.
    ///
    /// Only a failure to reach the reference node is an error.
    pub async fn run(&self, entry: &NodeAddress) -> Result<CheckReport> {
        info!(entry = %entry, "Checking cluster");
        let mut client = self.connector.connect(entry).await?;
        let raw = client.snapshot().await?;
        drop(client);

        let reference = normalize(&raw);
        let coverage = check_slot_coverage(&reference, self.total_slots);
        let links = check_links(&reference);
        let orphaned_replicas = find_orphaned_replicas(&reference);
        let open_slots = raw
            .open_slots()
            .into_iter()
            .map(|(reporter, slot)| OpenSlotFinding { reporter, slot })
            .collect();
        let agreement = self.check_agreement(&reference).await;

        let report = CheckReport {
            reference: entry.to_string(),
            node_count: reference.len(),
            coverage,
            links,
            agreement,
            open_slots,
            orphaned_replicas,
        };
        info!(healthy = report.is_healthy(), nodes = report.node_count, "Check finished");
        Ok(report)
    }
}
