//! Slot migration engine (`reshard`).
//!
//! Moves the highest-numbered `N` slots of one master to another, one slot
//! at a time:
//!
//! 1. `SETSLOT IMPORTING` on the destination, `SETSLOT MIGRATING` on the
//!    source
//! 2. drain: fetch up to `batch_size` keys in the slot from the source and
//!    `MIGRATE` each one, until a fetch comes back empty. A key that fails
//!    is reported once and not retried within the slot
//! 3. `SETSLOT NODE <destination>` on the destination, then on the source
//!
//! A slot that cannot make progress is left in its transitional state and
//! reported; the slots after it are not attempted. Finishing such a slot
//! needs the store's own transitional-state semantics, so nothing here
//! tries to replay it.

use crate::client::{ClusterClient, Connector};
use crate::error::{RcctlError, Result};
use crate::topology::{normalize, NodeAddress, Snapshot};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshardRequest {
    pub source_id: String,
    pub destination_id: String,
    pub slot_count: usize,
    /// Keys fetched per drain round.
    pub batch_size: usize,
}

/// A validated migration, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub source_id: String,
    pub source: NodeAddress,
    pub destination_id: String,
    pub destination: NodeAddress,
    /// Slots to move, ascending.
    pub slots: Vec<u16>,
    pub batch_size: usize,
}

/// The top `count` slots of an ascending slot list, ascending.
pub fn select_slots(owned: &[u16], count: usize) -> Vec<u16> {
    let start = owned.len().saturating_sub(count);
    owned[start..].to_vec()
}

/// Check every precondition against `snapshot` and pick the slots.
///
/// All violations are collected into one error so the operator sees them
/// together.
pub fn validate_migration(snapshot: &Snapshot, request: &ReshardRequest) -> Result<MigrationPlan> {
    let mut violations = Vec::new();

    if request.slot_count == 0 {
        violations.push("slot count must be at least 1".to_string());
    }
    if request.batch_size == 0 {
        violations.push("batch size must be at least 1".to_string());
    }
    if request.source_id == request.destination_id {
        violations.push("source and destination are the same node".to_string());
    }

    let source = snapshot.find(&request.source_id);
    let destination = snapshot.find(&request.destination_id);

    match source {
        None => violations.push(format!("source node {} not found", request.source_id)),
        Some(node) if !node.is_master() => {
            violations.push(format!("source node {} is not a master", request.source_id))
        }
        Some(node) => {
            let owned = node.slot_count();
            if owned < request.slot_count {
                violations.push(format!(
                    "source node {} owns {} slots, {} requested",
                    request.source_id, owned, request.slot_count
                ));
            }
        }
    }
    match destination {
        None => violations.push(format!(
            "destination node {} not found",
            request.destination_id
        )),
        Some(node) if !node.is_master() => violations.push(format!(
            "destination node {} is not a master",
            request.destination_id
        )),
        Some(_) => {}
    }

    let (Some(source), Some(destination)) = (source, destination) else {
        return Err(RcctlError::Precondition(violations.join("; ")));
    };
    if !violations.is_empty() {
        return Err(RcctlError::Precondition(violations.join("; ")));
    }

    Ok(MigrationPlan {
        source_id: source.node_id.clone(),
        source: source.endpoint()?,
        destination_id: destination.node_id.clone(),
        destination: destination.endpoint()?,
        slots: select_slots(&source.owned_slots(), request.slot_count),
        batch_size: request.batch_size,
    })
}

/// Where a slot migration ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    /// Not attempted.
    #[default]
    Pending,
    /// Both transitional markers set.
    Migrating,
    /// Keys are being moved.
    Draining,
    /// Drained; ownership is being handed over.
    Finalizing,
    Complete,
    /// No progress possible; the slot is left transitional.
    Stalled { reason: String },
}

impl MigrationState {
    pub fn is_complete(&self) -> bool {
        matches!(self, MigrationState::Complete)
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, MigrationState::Stalled { .. })
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::Migrating => write!(f, "migrating"),
            MigrationState::Draining => write!(f, "draining"),
            MigrationState::Finalizing => write!(f, "finalizing"),
            MigrationState::Complete => write!(f, "complete"),
            MigrationState::Stalled { reason } => write!(f, "stalled: {}", reason),
        }
    }
}

/// A key that could not be relocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub slot: u16,
    pub key: String,
    pub reason: String,
}

/// Progress of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotMigration {
    pub slot: u16,
    pub state: MigrationState,
    pub keys_moved: u64,
}

impl SlotMigration {
    fn new(slot: u16) -> Self {
        Self {
            slot,
            state: MigrationState::Pending,
            keys_moved: 0,
        }
    }

    fn stall(&mut self, reason: impl ToString) {
        self.state = MigrationState::Stalled {
            reason: reason.to_string(),
        };
    }
}

/// Summary of a reshard run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReshardReport {
    pub source_id: String,
    pub destination_id: String,
    pub migrations: Vec<SlotMigration>,
    pub key_failures: Vec<KeyFailure>,
}

impl ReshardReport {
    pub fn moved_slots(&self) -> Vec<u16> {
        self.slots_where(MigrationState::is_complete)
    }

    pub fn stalled_slots(&self) -> Vec<u16> {
        self.slots_where(MigrationState::is_stalled)
    }

    pub fn pending_slots(&self) -> Vec<u16> {
        self.slots_where(|s| *s == MigrationState::Pending)
    }

    pub fn keys_moved(&self) -> u64 {
        self.migrations.iter().map(|m| m.keys_moved).sum()
    }

    pub fn is_complete_success(&self) -> bool {
        self.migrations.iter().all(|m| m.state.is_complete())
    }

    fn slots_where(&self, pred: impl Fn(&MigrationState) -> bool) -> Vec<u16> {
        self.migrations
            .iter()
            .filter(|m| pred(&m.state))
            .map(|m| m.slot)
            .collect()
    }
}

/// Runs migrations.
pub struct SlotMigrationEngine<'a> {
    connector: &'a dyn Connector,
    migrate_timeout: Duration,
}

impl<'a> SlotMigrationEngine<'a> {
    pub fn new(connector: &'a dyn Connector, migrate_timeout: Duration) -> Self {
        Self {
            connector,
            migrate_timeout,
        }
    }

    /// Discover the topology through `entry`, validate, and migrate.
    ///
    /// Precondition violations fail before any connection to the source or
    /// destination is opened.
    pub async fn reshard(&self, entry: &NodeAddress, request: &ReshardRequest) -> Result<ReshardReport> {
        let snapshot = {
            let mut client = self.connector.connect(entry).await?;
            normalize(&client.snapshot().await?)
        };
        let plan = validate_migration(&snapshot, request)?;
        self.execute(&plan).await
    }

    /// Run a validated plan, strictly one slot after another.
    pub async fn execute(&self, plan: &MigrationPlan) -> Result<ReshardReport> {
        info!(
            source = %plan.source_id,
            destination = %plan.destination_id,
            slots = plan.slots.len(),
            "Starting reshard"
        );
        let mut source = self.connector.connect(&plan.source).await?;
        let mut destination = self.connector.connect(&plan.destination).await?;

        let mut migrations: Vec<SlotMigration> =
            plan.slots.iter().map(|s| SlotMigration::new(*s)).collect();
        let mut key_failures = Vec::new();

        for migration in migrations.iter_mut() {
            self.migrate_slot(
                plan,
                source.as_mut(),
                destination.as_mut(),
                migration,
                &mut key_failures,
            )
            .await;
            if let MigrationState::Stalled { reason } = &migration.state {
                warn!(slot = migration.slot, reason = %reason, "Slot left in transitional state; stopping");
                break;
            }
        }

        let report = ReshardReport {
            source_id: plan.source_id.clone(),
            destination_id: plan.destination_id.clone(),
            migrations,
            key_failures,
        };
        info!(
            moved = report.moved_slots().len(),
            stalled = report.stalled_slots().len(),
            pending = report.pending_slots().len(),
            keys = report.keys_moved(),
            "Reshard finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(slot = migration.slot))]
    async fn migrate_slot(
        &self,
        plan: &MigrationPlan,
        source: &mut dyn ClusterClient,
        destination: &mut dyn ClusterClient,
        migration: &mut SlotMigration,
        key_failures: &mut Vec<KeyFailure>,
    ) {
        let slot = migration.slot;

        if let Err(e) = destination.set_slot_importing(slot, &plan.source_id).await {
            migration.stall(e);
            return;
        }
        if let Err(e) = source.set_slot_migrating(slot, &plan.destination_id).await {
            migration.stall(e);
            return;
        }
        migration.state = MigrationState::Migrating;

        // Keys that already failed stay in the slot; each is tried once.
        let mut failed: HashSet<Bytes> = HashSet::new();
        loop {
            let keys = match source.keys_in_slot(slot, plan.batch_size).await {
                Ok(keys) => keys,
                Err(e) => {
                    migration.stall(e);
                    return;
                }
            };
            if keys.is_empty() {
                break;
            }
            migration.state = MigrationState::Draining;

            let mut moved = 0u64;
            for key in &keys {
                if failed.contains(key) {
                    continue;
                }
                match source
                    .relocate_key(&plan.destination, key, self.migrate_timeout)
                    .await
                {
                    Ok(()) => moved += 1,
                    Err(e) => {
                        failed.insert(key.clone());
                        let key = String::from_utf8_lossy(key).into_owned();
                        warn!(key = %key, error = %e, "Key relocation failed");
                        key_failures.push(KeyFailure {
                            slot,
                            key,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            debug!(moved, batch = keys.len(), "Batch relocated");
            migration.keys_moved += moved;
            if moved == 0 {
                migration.stall(format!(
                    "no key of a {}-key batch could be relocated",
                    keys.len()
                ));
                return;
            }
        }

        migration.state = MigrationState::Finalizing;
        if let Err(e) = destination.set_slot_owner(slot, &plan.destination_id).await {
            migration.stall(e);
            return;
        }
        if let Err(e) = source.set_slot_owner(slot, &plan.destination_id).await {
            migration.stall(e);
            return;
        }
        migration.state = MigrationState::Complete;
        info!(keys = migration.keys_moved, "Slot migrated");
    }
}
