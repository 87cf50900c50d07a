//! Parser for the textual `CLUSTER NODES` table.
//!
//! Line format:
//!
//! ```text
//! <id> <ip:port@cport[,hostname]> <flags> <master|-> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> <slot> ...
//! ```
//!
//! Slot fields are ranges (`0-5460`), single slots (`5461`) or, on the
//! node that owns the transition, markers for open slots:
//! `[93->-<node-id>]` (migrating) and `[93-<-<node-id>]` (importing).

use super::{OpenSlot, OpenSlotState, RawNode, RawSlot, RawSnapshot};
use crate::error::{RcctlError, Result};
use crate::slots::SlotRange;
use tracing::warn;

impl RawSnapshot {
    /// Parse the textual `CLUSTER NODES` output.
    pub fn parse_cluster_nodes(output: &str) -> Result<Self> {
        let mut snapshot = RawSnapshot::new();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (addr, node) = parse_line(line)?;
            snapshot.insert(addr, node);
        }
        Ok(snapshot)
    }
}

fn parse_line(line: &str) -> Result<(String, RawNode)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return Err(RcctlError::Parse(format!(
            "not enough fields in CLUSTER NODES line: {}",
            line
        )));
    }

    // ip:port@cport[,hostname] -> ip:port
    let addr = parts[1].split('@').next().unwrap_or(parts[1]).to_string();

    let master_id = match parts[3] {
        "-" => None,
        id => Some(id.to_string()),
    };

    let mut slots = Vec::new();
    let mut open_slots = Vec::new();
    for field in &parts[8..] {
        if field.starts_with('[') {
            match parse_open_slot(field) {
                Some(open) => open_slots.push(open),
                None => warn!(node = %addr, field = %field, "Unrecognized slot marker"),
            }
        } else {
            match SlotRange::parse(field) {
                Some(range) => slots.push(RawSlot::range(range.start as i64, range.end as i64)),
                // Keep it; normalization decides and warns.
                None => slots.push(RawSlot::Text(field.to_string())),
            }
        }
    }

    let node = RawNode {
        node_id: parts[0].to_string(),
        flags: parts[2].to_string(),
        master_id,
        slots,
        connected: parts[7] == "connected",
        open_slots,
    };
    Ok((addr, node))
}

fn parse_open_slot(field: &str) -> Option<OpenSlot> {
    let inner = field.strip_prefix('[')?.strip_suffix(']')?;
    let (slot, state, peer) = if let Some((slot, peer)) = inner.split_once("->-") {
        (slot, OpenSlotState::Migrating, peer)
    } else if let Some((slot, peer)) = inner.split_once("-<-") {
        (slot, OpenSlotState::Importing, peer)
    } else {
        return None;
    };
    Some(OpenSlot {
        slot: slot.parse().ok()?,
        state,
        peer_id: peer.to_string(),
    })
}
