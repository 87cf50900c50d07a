//! Cluster topology model.
//!
//! A topology is always observed from one vantage point: the node that
//! answered the listing call. The raw form ([`RawSnapshot`]) mirrors what a
//! node reports; [`normalize`] turns it into a [`Snapshot`] whose structural
//! equality is meaningful across vantage points:
//!
//! - flags are split, the self-referential `myself` marker is dropped and
//!   the rest is sorted, so flag order never matters
//! - slot entries (ranges, singletons, pre-stringified ranges) are coerced
//!   to the canonical `"start-end"` / `"n"` strings and sorted
//! - nodes are keyed and iterated by address
//!
//! Snapshots are rebuilt from every fetch and never mutated in place.

mod parse;

use crate::error::{RcctlError, Result};
use crate::slots::{self, SlotRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

/// Flag a node uses to mark its own entry in a listing.
pub const MYSELF_FLAG: &str = "myself";
/// Flag carried by master nodes.
pub const MASTER_FLAG: &str = "master";

/// Host and port of a store process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for NodeAddress {
    type Err = RcctlError;

    /// Parse `host:port`, `[v6]:port` or a bare IPv6 `a:b::c:port`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RcctlError::Parse(format!("invalid node address {:?} (expected host:port)", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RcctlError::Parse(format!("missing host in {:?}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RcctlError::Parse(format!("invalid port in {:?}", s)))?;
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Master,
    Replica,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// A slot entry as reported by a node, before canonicalization.
///
/// Structured listings report a two-element list for a range, a number or
/// one-element list for a single slot, and sometimes a range that was
/// already turned into text (`"0-5460"`, `"[0, 5460]"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSlot {
    Single(i64),
    List(Vec<i64>),
    Text(String),
}

impl RawSlot {
    pub fn range(start: i64, end: i64) -> Self {
        RawSlot::List(vec![start, end])
    }

    /// Canonical range for this entry, or `None` when malformed.
    pub fn canonical(&self) -> Option<SlotRange> {
        match self {
            RawSlot::Single(n) => to_range(*n, *n),
            RawSlot::List(items) => match items.as_slice() {
                [n] => to_range(*n, *n),
                [start, end] => to_range(*start, *end),
                _ => None,
            },
            RawSlot::Text(text) => parse_slot_text(text),
        }
    }
}

fn to_range(start: i64, end: i64) -> Option<SlotRange> {
    let start = u16::try_from(start).ok()?;
    let end = u16::try_from(end).ok()?;
    (start <= end).then(|| SlotRange::new(start, end))
}

fn parse_slot_text(text: &str) -> Option<SlotRange> {
    let trimmed = text.trim();
    // "[93->-id]" / "[93-<-id]" are transitional markers, not ownership.
    if trimmed.contains("->-") || trimmed.contains("-<-") {
        return None;
    }
    let inner = trimmed.trim_start_matches('[').trim_end_matches(']');
    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ' '))
        .collect();
    if cleaned.contains(',') {
        let parts: Vec<&str> = cleaned.split(',').collect();
        match parts.as_slice() {
            [n] => {
                let n = n.parse().ok()?;
                to_range(n, n)
            }
            [start, end] => to_range(start.parse().ok()?, end.parse().ok()?),
            _ => None,
        }
    } else {
        SlotRange::parse(&cleaned)
    }
}

/// Direction of a slot in a transitional state, as seen by the node
/// that reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenSlotState {
    /// Slot is being received from `peer_id`.
    Importing,
    /// Slot is being handed over to `peer_id`.
    Migrating,
}

/// A slot left importing or migrating on some node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSlot {
    pub slot: u16,
    pub state: OpenSlotState,
    pub peer_id: String,
}

/// One node as reported by the listing call, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawNode {
    pub node_id: String,
    /// Comma separated flags (`myself,master`, `slave`, `master,fail`, ...).
    pub flags: String,
    #[serde(default)]
    pub master_id: Option<String>,
    #[serde(default)]
    pub slots: Vec<RawSlot>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_slots: Vec<OpenSlot>,
}

impl RawNode {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.split(',').any(|f| f.trim() == flag)
    }
}

/// Address → node mapping as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSnapshot {
    pub nodes: BTreeMap<String, RawNode>,
}

impl RawSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: impl Into<String>, node: RawNode) {
        self.nodes.insert(addr.into(), node);
    }

    /// The entry the reporting node flagged as itself.
    pub fn myself(&self) -> Option<(&str, &RawNode)> {
        self.nodes
            .iter()
            .find(|(_, node)| node.has_flag(MYSELF_FLAG))
            .map(|(addr, node)| (addr.as_str(), node))
    }

    /// Every transitional slot reported in this listing, with the address
    /// of the node that reported it.
    pub fn open_slots(&self) -> Vec<(String, OpenSlot)> {
        self.nodes
            .iter()
            .flat_map(|(addr, node)| {
                node.open_slots
                    .iter()
                    .map(move |open| (addr.clone(), open.clone()))
            })
            .collect()
    }
}

/// One node after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub address: String,
    /// Sorted flags without `myself`, comma separated.
    pub flags: String,
    pub master_id: Option<String>,
    /// Canonical slot strings (`"0-5460"`, `"7"`), ascending.
    pub slots: Vec<String>,
    pub connected: bool,
}

impl Node {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.split(',').any(|f| f == flag)
    }

    pub fn is_master(&self) -> bool {
        self.has_flag(MASTER_FLAG)
    }

    pub fn role(&self) -> Role {
        if self.is_master() {
            Role::Master
        } else {
            Role::Replica
        }
    }

    /// Slot ranges owned by this node.
    pub fn slot_ranges(&self) -> Vec<SlotRange> {
        self.slots.iter().filter_map(|s| SlotRange::parse(s)).collect()
    }

    /// Every slot owned by this node, ascending.
    pub fn owned_slots(&self) -> Vec<u16> {
        slots::expand(&self.slot_ranges())
    }

    pub fn slot_count(&self) -> usize {
        self.owned_slots().len()
    }

    /// Connection endpoint parsed from the listing address.
    pub fn endpoint(&self) -> Result<NodeAddress> {
        // Listings may carry the bus port ("ip:port@cport").
        let addr = self.address.split('@').next().unwrap_or(&self.address);
        addr.parse()
    }
}

/// Normalized view of the cluster from one vantage point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    nodes: BTreeMap<String, Node>,
}

impl Snapshot {
    /// Nodes in address order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get(&self, address: &str) -> Option<&Node> {
        self.nodes.get(address)
    }

    /// Look a node up by id.
    pub fn find(&self, node_id: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.node_id == node_id)
    }

    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_master())
    }

    /// Nodes whose `master_id` references `node_id`.
    pub fn replicas_of<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.master_id.as_deref() == Some(node_id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Back to the raw shape, so a normalized snapshot can be fed through
    /// [`normalize`] again.
    pub fn to_raw(&self) -> RawSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|(addr, node)| {
                let raw = RawNode {
                    node_id: node.node_id.clone(),
                    flags: node.flags.clone(),
                    master_id: node.master_id.clone(),
                    slots: node.slots.iter().cloned().map(RawSlot::Text).collect(),
                    connected: node.connected,
                    open_slots: Vec::new(),
                };
                (addr.clone(), raw)
            })
            .collect();
        RawSnapshot { nodes }
    }
}

/// Normalize flags: split, drop `myself` and blanks, sort, rejoin.
pub fn normalize_flags(flags: &str) -> String {
    let mut parts: Vec<&str> = flags
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty() && *f != MYSELF_FLAG)
        .collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join(",")
}

/// Canonicalize slot entries into `"start-end"` / `"n"` strings, sorted as
/// strings (`"10-20"` before `"9"`).
///
/// Malformed entries are skipped with a warning; the coverage check will
/// surface the gap they leave.
pub fn normalize_slots(address: &str, slots: &[RawSlot]) -> Vec<String> {
    let mut canonical: Vec<String> = Vec::with_capacity(slots.len());
    for entry in slots {
        match entry.canonical() {
            Some(range) => canonical.push(range.to_string()),
            None => warn!(node = %address, entry = ?entry, "Skipping malformed slot entry"),
        }
    }
    canonical.sort_unstable();
    canonical.dedup();
    canonical
}

/// Build the canonical snapshot for a raw listing. Pure.
pub fn normalize(raw: &RawSnapshot) -> Snapshot {
    let nodes = raw
        .nodes
        .iter()
        .map(|(addr, node)| {
            let master_id = node
                .master_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty() && *id != "-")
                .map(str::to_string);
            let normalized = Node {
                node_id: node.node_id.clone(),
                address: addr.clone(),
                flags: normalize_flags(&node.flags),
                master_id,
                slots: normalize_slots(addr, &node.slots),
                connected: node.connected,
            };
            (addr.clone(), normalized)
        })
        .collect();
    Snapshot { nodes }
}
