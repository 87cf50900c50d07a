//! Seed a cluster with string keys (`populate-test-data`).
//!
//! Keys are `key:{i:010}` with values `val:{i:010}` for `i` in `1..=n`.
//! Each key is routed to the master that owns its slot in the snapshot
//! taken at the start; the cluster is not re-read while writing.

use crate::client::{ClusterClient, Connector};
use crate::error::{RcctlError, Result};
use crate::slots::key_slot;
use crate::topology::{normalize, NodeAddress, Snapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tracing::{info, warn};

/// Accepted key counts.
pub const KEY_COUNT_RANGE: RangeInclusive<u64> = 1..=10_000_000;

/// Failures kept in the report; the rest are only counted.
const MAX_REPORTED_FAILURES: usize = 20;

const PROGRESS_EVERY: u64 = 100_000;

pub fn test_key(i: u64) -> String {
    format!("key:{:010}", i)
}

pub fn test_value(i: u64) -> String {
    format!("val:{:010}", i)
}

/// Slot to owning master address, built from one snapshot.
#[derive(Debug, Clone)]
pub struct RouteTable {
    owners: Vec<Option<String>>,
    total_slots: u16,
}

impl RouteTable {
    pub fn from_snapshot(snapshot: &Snapshot, total_slots: u16) -> Self {
        let mut owners = vec![None; total_slots as usize];
        for master in snapshot.masters() {
            for slot in master.owned_slots() {
                if let Some(owner) = owners.get_mut(slot as usize) {
                    *owner = Some(master.address.clone());
                }
            }
        }
        Self {
            owners,
            total_slots,
        }
    }

    /// Address of the master owning `key`, if the slot has one.
    pub fn route(&self, key: &[u8]) -> Option<&str> {
        let slot = key_slot(key, self.total_slots);
        self.owners.get(slot as usize)?.as_deref()
    }

    /// Distinct owner addresses.
    pub fn owners(&self) -> Vec<&str> {
        let mut owners: Vec<&str> = self.owners.iter().flatten().map(String::as_str).collect();
        owners.sort_unstable();
        owners.dedup();
        owners
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyWriteFailure {
    pub key: String,
    pub reason: String,
}

/// Summary of a populate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub requested: u64,
    pub written: u64,
    pub failed: u64,
    /// The first few failures.
    pub failures: Vec<KeyWriteFailure>,
}

impl PopulateReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    fn fail(&mut self, key: String, reason: impl ToString) {
        self.failed += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            let reason = reason.to_string();
            warn!(key = %key, reason = %reason, "Write failed");
            self.failures.push(KeyWriteFailure { key, reason });
        }
    }
}

pub fn validate_key_count(count: u64) -> Result<()> {
    if KEY_COUNT_RANGE.contains(&count) {
        Ok(())
    } else {
        Err(RcctlError::Precondition(format!(
            "number of keys must be between {} and {}, got {}",
            KEY_COUNT_RANGE.start(),
            KEY_COUNT_RANGE.end(),
            count
        )))
    }
}

pub struct DataPopulator<'a> {
    connector: &'a dyn Connector,
    total_slots: u16,
}

impl<'a> DataPopulator<'a> {
    pub fn new(connector: &'a dyn Connector, total_slots: u16) -> Self {
        Self {
            connector,
            total_slots,
        }
    }

    /// Write `count` keys through the cluster reachable at `entry`.
    pub async fn populate(&self, entry: &NodeAddress, count: u64) -> Result<PopulateReport> {
        validate_key_count(count)?;

        let snapshot = {
            let mut client = self.connector.connect(entry).await?;
            normalize(&client.snapshot().await?)
        };
        let routes = RouteTable::from_snapshot(&snapshot, self.total_slots);

        let mut clients: HashMap<String, Box<dyn ClusterClient>> = HashMap::new();
        let mut unreachable: HashMap<String, String> = HashMap::new();
        for owner in routes.owners() {
            match self.connect_to(owner).await {
                Ok(client) => {
                    clients.insert(owner.to_string(), client);
                }
                Err(e) => {
                    warn!(node = %owner, error = %e, "Master unreachable; its keys will fail");
                    unreachable.insert(owner.to_string(), e.to_string());
                }
            }
        }

        info!(keys = count, masters = clients.len(), "Writing test data");
        let mut report = PopulateReport {
            requested: count,
            written: 0,
            failed: 0,
            failures: Vec::new(),
        };
        for i in 1..=count {
            let key = test_key(i);
            let Some(owner) = routes.route(key.as_bytes()) else {
                report.fail(key, "slot has no owner");
                continue;
            };
            match clients.get_mut(owner) {
                Some(client) => {
                    let value = test_value(i);
                    let result = client.set(&key, &value).await;
                    match result {
                        Ok(()) => report.written += 1,
                        Err(e) => report.fail(key, e),
                    }
                }
                None => {
                    let reason = unreachable
                        .get(owner)
                        .map(String::as_str)
                        .unwrap_or("master unreachable");
                    report.fail(key, reason);
                }
            }
            if i % PROGRESS_EVERY == 0 {
                info!(done = i, total = count, "Progress");
            }
        }

        info!(written = report.written, failed = report.failed, "Test data written");
        Ok(report)
    }

    async fn connect_to(&self, address: &str) -> Result<Box<dyn ClusterClient>> {
        let endpoint: NodeAddress = address.parse()?;
        self.connector.connect(&endpoint).await
    }
}
