//! In-memory cluster used by the integration tests.
//!
//! Implements [`Connector`] and [`ClusterClient`] over one shared state that
//! behaves like a small Redis Cluster: membership spreads instantly on
//! MEET, slot claims fail with "already busy", SETSLOT keeps per-node
//! importing/migrating markers, MIGRATE moves keys between nodes. Every
//! primitive is recorded so tests can assert on exact call sequences, and
//! failures can be injected per node and operation.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use rcctl::client::{ClusterClient, Connector, NodesListing};
use rcctl::error::{RcctlError, Result};
use rcctl::slots::{collapse, key_slot, partition_slots, SlotRange, DEFAULT_TOTAL_SLOTS};
use rcctl::topology::{NodeAddress, OpenSlot, OpenSlotState, RawNode, RawSlot, RawSnapshot};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded primitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub addr: String,
    pub op: &'static str,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeNode {
    node_id: String,
    address: NodeAddress,
    is_master: bool,
    master_id: Option<String>,
    connected: bool,
    /// Addresses this node knows, itself included.
    members: BTreeSet<String>,
    keys: BTreeMap<u16, Vec<Vec<u8>>>,
    importing: BTreeMap<u16, String>,
    migrating: BTreeMap<u16, String>,
    view_override: Option<RawSnapshot>,
}

#[derive(Debug)]
struct ClusterState {
    nodes: BTreeMap<String, FakeNode>,
    /// Slot -> owning node id.
    slot_owners: Vec<Option<String>>,
    calls: Vec<Call>,
    failures: HashMap<(String, &'static str), String>,
    unreachable: HashSet<String>,
    stuck_keys: HashSet<Vec<u8>>,
    raw_listings: bool,
}

impl ClusterState {
    fn node(&self, addr: &str) -> &FakeNode {
        &self.nodes[addr]
    }

    fn node_mut(&mut self, addr: &str) -> &mut FakeNode {
        self.nodes.get_mut(addr).unwrap()
    }

    fn addr_of(&self, node_id: &str) -> Option<String> {
        self.nodes
            .values()
            .find(|n| n.node_id == node_id)
            .map(|n| n.address.to_string())
    }

    fn slots_of(&self, node_id: &str) -> Vec<SlotRange> {
        let owned: Vec<u16> = self
            .slot_owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.as_deref() == Some(node_id))
            .map(|(slot, _)| slot as u16)
            .collect();
        collapse(&owned)
    }

    /// The listing `viewer` would report.
    fn listing(&self, viewer: &str) -> RawSnapshot {
        let me = self.node(viewer);
        if let Some(view) = &me.view_override {
            return view.clone();
        }
        let mut snapshot = RawSnapshot::new();
        for addr in &me.members {
            let node = self.node(addr);
            let role = if node.is_master { "master" } else { "slave" };
            let flags = if addr == viewer {
                format!("myself,{}", role)
            } else {
                role.to_string()
            };
            let slots = self
                .slots_of(&node.node_id)
                .iter()
                .map(|r| {
                    if r.start == r.end {
                        RawSlot::Single(r.start as i64)
                    } else {
                        RawSlot::range(r.start as i64, r.end as i64)
                    }
                })
                .collect();
            let open_slots = if addr == viewer {
                open_slots_of(node)
            } else {
                Vec::new()
            };
            snapshot.insert(
                addr.clone(),
                RawNode {
                    node_id: node.node_id.clone(),
                    flags,
                    master_id: node.master_id.clone(),
                    slots,
                    connected: node.connected,
                    open_slots,
                },
            );
        }
        snapshot
    }

    /// The same listing as `CLUSTER NODES` text.
    fn listing_text(&self, viewer: &str) -> String {
        let mut out = String::new();
        for (addr, node) in &self.listing(viewer).nodes {
            let endpoint: NodeAddress = addr.parse().unwrap();
            let mut line = format!(
                "{} {}@{} {} {} 0 0 1 {}",
                node.node_id,
                addr,
                endpoint.port + 10000,
                node.flags,
                node.master_id.as_deref().unwrap_or("-"),
                if node.connected { "connected" } else { "disconnected" },
            );
            for slot in &node.slots {
                if let Some(range) = slot.canonical() {
                    line.push(' ');
                    line.push_str(&range.to_string());
                }
            }
            for open in &node.open_slots {
                let arrow = match open.state {
                    OpenSlotState::Migrating => "->-",
                    OpenSlotState::Importing => "-<-",
                };
                line.push_str(&format!(" [{}{}{}]", open.slot, arrow, open.peer_id));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn open_slots_of(node: &FakeNode) -> Vec<OpenSlot> {
    let migrating = node.migrating.iter().map(|(slot, peer)| OpenSlot {
        slot: *slot,
        state: OpenSlotState::Migrating,
        peer_id: peer.clone(),
    });
    let importing = node.importing.iter().map(|(slot, peer)| OpenSlot {
        slot: *slot,
        state: OpenSlotState::Importing,
        peer_id: peer.clone(),
    });
    migrating.chain(importing).collect()
}

/// Handle to the shared in-memory cluster.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

pub const BASE_PORT: u16 = 7000;

impl FakeCluster {
    /// `count` fresh nodes, each knowing only itself, none owning slots.
    pub fn empty(count: usize) -> Self {
        let mut nodes = BTreeMap::new();
        for i in 0..count {
            let address = NodeAddress::new("127.0.0.1", BASE_PORT + i as u16);
            let addr = address.to_string();
            nodes.insert(
                addr.clone(),
                FakeNode {
                    node_id: format!("{:040x}", 0xa000 + i),
                    address,
                    is_master: true,
                    master_id: None,
                    connected: true,
                    members: BTreeSet::from([addr]),
                    keys: BTreeMap::new(),
                    importing: BTreeMap::new(),
                    migrating: BTreeMap::new(),
                    view_override: None,
                },
            );
        }
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                nodes,
                slot_owners: vec![None; DEFAULT_TOTAL_SLOTS as usize],
                calls: Vec::new(),
                failures: HashMap::new(),
                unreachable: HashSet::new(),
                stuck_keys: HashSet::new(),
                raw_listings: false,
            })),
        }
    }

    /// A formed cluster: everyone knows everyone, the slot space is split
    /// evenly across the first `masters` nodes and the remaining nodes
    /// replicate them round robin.
    pub fn formed(masters: usize, replicas_per_master: usize) -> Self {
        let total = masters * (replicas_per_master + 1);
        let cluster = Self::empty(total);
        {
            let mut state = cluster.lock();
            let addrs: BTreeSet<String> = state.nodes.keys().cloned().collect();
            for node in state.nodes.values_mut() {
                node.members = addrs.clone();
            }

            let ordered: Vec<String> = cluster_order(&state);
            let master_ids: Vec<String> = ordered[..masters]
                .iter()
                .map(|a| state.node(a).node_id.clone())
                .collect();
            for (range, id) in partition_slots(DEFAULT_TOTAL_SLOTS, masters)
                .iter()
                .zip(&master_ids)
            {
                for slot in range.iter() {
                    state.slot_owners[slot as usize] = Some(id.clone());
                }
            }
            for (i, addr) in ordered[masters..].iter().enumerate() {
                let node = state.node_mut(addr);
                node.is_master = false;
                node.master_id = Some(master_ids[i % masters].clone());
            }
        }
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    /// Node addresses in port order.
    pub fn addresses(&self) -> Vec<NodeAddress> {
        let state = self.lock();
        cluster_order(&state)
            .iter()
            .map(|a| state.node(a).address.clone())
            .collect()
    }

    pub fn address(&self, index: usize) -> NodeAddress {
        self.addresses()[index].clone()
    }

    pub fn node_id(&self, addr: &NodeAddress) -> String {
        self.lock().node(&addr.to_string()).node_id.clone()
    }

    pub fn master_of(&self, addr: &NodeAddress) -> Option<String> {
        self.lock().node(&addr.to_string()).master_id.clone()
    }

    pub fn members_of(&self, addr: &NodeAddress) -> BTreeSet<String> {
        self.lock().node(&addr.to_string()).members.clone()
    }

    pub fn owner_of(&self, slot: u16) -> Option<String> {
        self.lock().slot_owners[slot as usize].clone()
    }

    /// Number of slots owned by `addr`.
    pub fn slot_count(&self, addr: &NodeAddress) -> usize {
        let state = self.lock();
        let id = state.node(&addr.to_string()).node_id.clone();
        state
            .slot_owners
            .iter()
            .filter(|o| o.as_deref() == Some(id.as_str()))
            .count()
    }

    pub fn unassign_slots(&self, range: SlotRange) {
        let mut state = self.lock();
        for slot in range.iter() {
            state.slot_owners[slot as usize] = None;
        }
    }

    /// Store `keys` on whichever master owns their slots.
    pub fn seed_keys(&self, keys: &[&str]) {
        let mut state = self.lock();
        for key in keys {
            let slot = key_slot(key.as_bytes(), DEFAULT_TOTAL_SLOTS);
            let owner = state.slot_owners[slot as usize].clone().unwrap();
            let addr = state.addr_of(&owner).unwrap();
            state
                .node_mut(&addr)
                .keys
                .entry(slot)
                .or_default()
                .push(key.as_bytes().to_vec());
        }
    }

    /// Keys `addr` holds in `slot`.
    pub fn keys_on(&self, addr: &NodeAddress, slot: u16) -> Vec<String> {
        self.lock()
            .node(&addr.to_string())
            .keys
            .get(&slot)
            .map(|keys| {
                keys.iter()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn key_count(&self, addr: &NodeAddress) -> usize {
        self.lock()
            .node(&addr.to_string())
            .keys
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn open_slots_on(&self, addr: &NodeAddress) -> Vec<OpenSlot> {
        open_slots_of(self.lock().node(&addr.to_string()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Recorded calls of one operation, in order.
    pub fn calls_named(&self, op: &str) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Calls that change cluster state.
    pub fn mutating_calls(&self) -> Vec<Call> {
        const READ_ONLY: [&str; 4] = ["CLUSTER NODES", "CLUSTER MYID", "CLUSTER GETKEYSINSLOT", "PING"];
        self.lock()
            .calls
            .iter()
            .filter(|c| !READ_ONLY.contains(&c.op))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make `op` on `addr` fail with `message`.
    pub fn fail_on(&self, addr: &NodeAddress, op: &'static str, message: &str) {
        self.lock()
            .failures
            .insert((addr.to_string(), op), message.to_string());
    }

    pub fn set_unreachable(&self, addr: &NodeAddress) {
        self.lock().unreachable.insert(addr.to_string());
    }

    /// Every view reports `addr` with this link state.
    pub fn set_connected(&self, addr: &NodeAddress, connected: bool) {
        self.lock().node_mut(&addr.to_string()).connected = connected;
    }

    /// Make `addr` report `view` instead of the shared state.
    pub fn override_view(&self, addr: &NodeAddress, view: RawSnapshot) {
        self.lock().node_mut(&addr.to_string()).view_override = Some(view);
    }

    pub fn view_of(&self, addr: &NodeAddress) -> RawSnapshot {
        self.lock().listing(&addr.to_string())
    }

    /// MIGRATE of this key always fails.
    pub fn stick_key(&self, key: &str) {
        self.lock().stuck_keys.insert(key.as_bytes().to_vec());
    }

    /// Answer listings as `CLUSTER NODES` text instead of structured data.
    pub fn use_raw_listings(&self, raw: bool) {
        self.lock().raw_listings = raw;
    }

    /// Put `slot` into the importing/migrating state between two nodes.
    pub fn open_slot(&self, slot: u16, source: &NodeAddress, destination: &NodeAddress) {
        let mut state = self.lock();
        let source_id = state.node(&source.to_string()).node_id.clone();
        let destination_id = state.node(&destination.to_string()).node_id.clone();
        state
            .node_mut(&source.to_string())
            .migrating
            .insert(slot, destination_id);
        state
            .node_mut(&destination.to_string())
            .importing
            .insert(slot, source_id);
    }
}

fn cluster_order(state: &ClusterState) -> Vec<String> {
    let mut nodes: Vec<&FakeNode> = state.nodes.values().collect();
    nodes.sort_by_key(|n| n.address.port);
    nodes.iter().map(|n| n.address.to_string()).collect()
}

#[async_trait]
impl Connector for FakeCluster {
    async fn connect(&self, addr: &NodeAddress) -> Result<Box<dyn ClusterClient>> {
        let key = addr.to_string();
        let state = self.lock();
        if state.unreachable.contains(&key) || !state.nodes.contains_key(&key) {
            return Err(RcctlError::remote(addr, "CONNECT", "Connection refused (os error 111)"));
        }
        Ok(Box::new(FakeClient {
            addr: addr.clone(),
            key,
            state: self.state.clone(),
        }))
    }
}

/// Connection to one node of a [`FakeCluster`].
pub struct FakeClient {
    addr: NodeAddress,
    key: String,
    state: Arc<Mutex<ClusterState>>,
}

impl FakeClient {
    /// Record the call and apply any injected failure.
    fn begin(&self, op: &'static str, args: Vec<String>) -> Result<MutexGuard<'_, ClusterState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            addr: self.key.clone(),
            op,
            args,
        });
        if state.unreachable.contains(&self.key) {
            return Err(RcctlError::Timeout {
                addr: self.key.clone(),
                operation: op,
                duration: Duration::from_secs(10),
            });
        }
        if let Some(message) = state.failures.get(&(self.key.clone(), op)) {
            return Err(RcctlError::remote(&self.addr, op, message));
        }
        Ok(state)
    }

    fn err(&self, op: &'static str, message: impl ToString) -> RcctlError {
        RcctlError::remote(&self.addr, op, message)
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    fn address(&self) -> &NodeAddress {
        &self.addr
    }

    async fn ping(&mut self) -> Result<()> {
        self.begin("PING", Vec::new())?;
        Ok(())
    }

    async fn introduce(&mut self, host: &str, port: u16) -> Result<()> {
        const OP: &str = "CLUSTER MEET";
        let mut state = self.begin(OP, vec![host.to_string(), port.to_string()])?;
        let peer = NodeAddress::new(host, port).to_string();
        if !state.nodes.contains_key(&peer) {
            return Err(self.err(OP, format!("ERR Invalid node address specified: {}", peer)));
        }
        let mut merged = state.node(&self.key).members.clone();
        merged.extend(state.node(&peer).members.iter().cloned());
        for addr in merged.clone() {
            state.node_mut(&addr).members = merged.clone();
        }
        Ok(())
    }

    async fn add_slots(&mut self, slots: &[u16]) -> Result<()> {
        const OP: &str = "CLUSTER ADDSLOTS";
        let ranges = collapse(slots).iter().map(ToString::to_string).collect();
        let mut state = self.begin(OP, ranges)?;
        for slot in slots {
            if state.slot_owners[*slot as usize].is_some() {
                return Err(self.err(OP, format!("ERR Slot {} is already busy", slot)));
            }
        }
        let id = state.node(&self.key).node_id.clone();
        for slot in slots {
            state.slot_owners[*slot as usize] = Some(id.clone());
        }
        Ok(())
    }

    async fn my_id(&mut self) -> Result<String> {
        let state = self.begin("CLUSTER MYID", Vec::new())?;
        Ok(state.node(&self.key).node_id.clone())
    }

    async fn attach_replica(&mut self, master_id: &str) -> Result<()> {
        const OP: &str = "CLUSTER REPLICATE";
        let mut state = self.begin(OP, vec![master_id.to_string()])?;
        let Some(master_addr) = state.addr_of(master_id) else {
            return Err(self.err(OP, format!("ERR Unknown node {}", master_id)));
        };
        if !state.node(&self.key).members.contains(&master_addr) {
            return Err(self.err(OP, format!("ERR Unknown node {}", master_id)));
        }
        if !state.node(&master_addr).is_master {
            return Err(self.err(OP, "ERR I can only replicate a master, not a replica."));
        }
        let my_id = state.node(&self.key).node_id.clone();
        if !state.slots_of(&my_id).is_empty() {
            return Err(self.err(
                OP,
                "ERR To set a master the node must be empty and without assigned slots.",
            ));
        }
        let me = state.node_mut(&self.key);
        me.is_master = false;
        me.master_id = Some(master_id.to_string());
        Ok(())
    }

    async fn list_nodes(&mut self) -> Result<NodesListing> {
        let state = self.begin("CLUSTER NODES", Vec::new())?;
        if state.raw_listings {
            Ok(NodesListing::Raw(state.listing_text(&self.key)))
        } else {
            Ok(NodesListing::Structured(state.listing(&self.key)))
        }
    }

    async fn forget(&mut self, node_id: &str) -> Result<()> {
        const OP: &str = "CLUSTER FORGET";
        let mut state = self.begin(OP, vec![node_id.to_string()])?;
        if state.node(&self.key).node_id == node_id {
            return Err(self.err(OP, "ERR I tried hard but I can't forget myself..."));
        }
        let known = state
            .addr_of(node_id)
            .filter(|addr| state.node(&self.key).members.contains(addr));
        match known {
            Some(addr) => {
                state.node_mut(&self.key).members.remove(&addr);
                Ok(())
            }
            None => Err(self.err(OP, format!("ERR Unknown node {}", node_id))),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        let mut state = self.begin("CLUSTER RESET", Vec::new())?;
        let id = state.node(&self.key).node_id.clone();
        for owner in state.slot_owners.iter_mut() {
            if owner.as_deref() == Some(id.as_str()) {
                *owner = None;
            }
        }
        let key = self.key.clone();
        let me = state.node_mut(&self.key);
        me.members = BTreeSet::from([key]);
        me.is_master = true;
        me.master_id = None;
        me.importing.clear();
        me.migrating.clear();
        Ok(())
    }

    async fn set_slot_importing(&mut self, slot: u16, from_node_id: &str) -> Result<()> {
        let mut state = self.begin(
            "CLUSTER SETSLOT IMPORTING",
            vec![slot.to_string(), from_node_id.to_string()],
        )?;
        state
            .node_mut(&self.key)
            .importing
            .insert(slot, from_node_id.to_string());
        Ok(())
    }

    async fn set_slot_migrating(&mut self, slot: u16, to_node_id: &str) -> Result<()> {
        const OP: &str = "CLUSTER SETSLOT MIGRATING";
        let mut state = self.begin(OP, vec![slot.to_string(), to_node_id.to_string()])?;
        let my_id = state.node(&self.key).node_id.clone();
        if state.slot_owners[slot as usize].as_deref() != Some(my_id.as_str()) {
            return Err(self.err(OP, format!("ERR I'm not the owner of hash slot {}", slot)));
        }
        state
            .node_mut(&self.key)
            .migrating
            .insert(slot, to_node_id.to_string());
        Ok(())
    }

    async fn set_slot_owner(&mut self, slot: u16, node_id: &str) -> Result<()> {
        const OP: &str = "CLUSTER SETSLOT NODE";
        let mut state = self.begin(OP, vec![slot.to_string(), node_id.to_string()])?;
        if state.addr_of(node_id).is_none() {
            return Err(self.err(OP, format!("ERR I don't know about node {}", node_id)));
        }
        state.slot_owners[slot as usize] = Some(node_id.to_string());
        let me = state.node_mut(&self.key);
        me.importing.remove(&slot);
        me.migrating.remove(&slot);
        Ok(())
    }

    async fn keys_in_slot(&mut self, slot: u16, limit: usize) -> Result<Vec<Bytes>> {
        let state = self.begin(
            "CLUSTER GETKEYSINSLOT",
            vec![slot.to_string(), limit.to_string()],
        )?;
        Ok(state
            .node(&self.key)
            .keys
            .get(&slot)
            .map(|keys| {
                keys.iter()
                    .take(limit)
                    .map(|k| Bytes::from(k.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn relocate_key(
        &mut self,
        to: &NodeAddress,
        key: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        const OP: &str = "MIGRATE";
        let mut state = self.begin(
            OP,
            vec![
                to.to_string(),
                String::from_utf8_lossy(key).into_owned(),
                timeout.as_millis().to_string(),
            ],
        )?;
        let target = to.to_string();
        if state.stuck_keys.contains(key)
            || state.unreachable.contains(&target)
            || !state.nodes.contains_key(&target)
        {
            return Err(self.err(OP, "IOERR error or timeout writing to target instance"));
        }
        let slot = key_slot(key, DEFAULT_TOTAL_SLOTS);
        let removed = match state.node_mut(&self.key).keys.get_mut(&slot) {
            Some(keys) => match keys.iter().position(|k| k.as_slice() == key) {
                Some(i) => {
                    keys.remove(i);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            state
                .node_mut(&target)
                .keys
                .entry(slot)
                .or_default()
                .push(key.to_vec());
        }
        Ok(())
    }

    async fn set(&mut self, key: &str, _value: &str) -> Result<()> {
        const OP: &str = "SET";
        let mut state = self.begin(OP, vec![key.to_string()])?;
        let slot = key_slot(key.as_bytes(), DEFAULT_TOTAL_SLOTS);
        let my_id = state.node(&self.key).node_id.clone();
        let owner = state.slot_owners[slot as usize].clone();
        if owner.as_deref() != Some(my_id.as_str()) {
            let redirect = owner
                .and_then(|id| state.addr_of(&id))
                .unwrap_or_else(|| "?".to_string());
            return Err(self.err(OP, format!("MOVED {} {}", slot, redirect)));
        }
        let keys = state.node_mut(&self.key).keys.entry(slot).or_default();
        if !keys.iter().any(|k| k.as_slice() == key.as_bytes()) {
            keys.push(key.as_bytes().to_vec());
        }
        Ok(())
    }
}

/// Cluster settings with no settling waits.
pub fn fast_config() -> rcctl::config::ClusterConfig {
    rcctl::config::ClusterConfig {
        settle_delay_ms: 0,
        join_poll_interval_ms: 0,
        migrate_timeout_ms: 1_000,
        ..Default::default()
    }
}
