//! Hash slot primitives.
//!
//! Pure functions over the slot space: contiguous ranges, the even
//! partitioning used when a cluster is bootstrapped, and the key → slot
//! mapping used for slot-aware writes.

use serde::{Deserialize, Serialize};

/// Default slot count for Redis Cluster (16384 slots)
pub const DEFAULT_TOTAL_SLOTS: u16 = 16384;

/// A contiguous range of hash slots `[start, end]`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range.
    ///
    /// # Panics
    /// Debug-only assertion that `start <= end`.
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({}) must be <= end ({})", start, end);
        Self { start, end }
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Number of slots in this range.
    pub fn count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Iterate over every slot in the range, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    /// Parse the canonical text form: `"start-end"` or `"n"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (start.trim().parse().ok()?, end.trim().parse().ok()?),
            None => {
                let slot = s.parse().ok()?;
                (slot, slot)
            }
        };
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Split `total_slots` across `masters` as evenly as possible.
///
/// The first `total_slots % masters` masters get one extra slot; ranges
/// are contiguous and ascending from slot 0. Returns an empty vector for
/// zero masters.
pub fn partition_slots(total_slots: u16, masters: usize) -> Vec<SlotRange> {
    if masters == 0 || total_slots == 0 {
        return Vec::new();
    }

    let total = total_slots as usize;
    let base = total / masters;
    let remainder = total % masters;

    let mut ranges = Vec::with_capacity(masters);
    let mut start = 0usize;
    for i in 0..masters {
        let count = base + usize::from(i < remainder);
        if count == 0 {
            // More masters than slots: the tail gets nothing.
            break;
        }
        let end = start + count - 1;
        ranges.push(SlotRange::new(start as u16, end as u16));
        start = end + 1;
    }
    ranges
}

/// Expand ranges into their individual slots, ascending and deduplicated.
pub fn expand(ranges: &[SlotRange]) -> Vec<u16> {
    let mut slots: Vec<u16> = ranges.iter().flat_map(|r| r.iter()).collect();
    slots.sort_unstable();
    slots.dedup();
    slots
}

/// Collapse a set of slots into the minimal list of contiguous ranges.
pub fn collapse(slots: &[u16]) -> Vec<SlotRange> {
    let mut sorted = slots.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<SlotRange> = Vec::new();
    for slot in sorted {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(slot) => last.end = slot,
            _ => ranges.push(SlotRange::single(slot)),
        }
    }
    ranges
}

/// Hash slot of a key, honoring `{hash tags}`.
///
/// Uses CRC16/XMODEM modulo `total_slots`. When the key contains a `{...}`
/// section with at least one character between the braces, only that
/// section is hashed.
pub fn key_slot(key: &[u8], total_slots: u16) -> u16 {
    let hashed = hash_tag(key).unwrap_or(key);
    crc16(hashed) % total_slots
}

fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let close = key[open + 1..].iter().position(|&b| b == b'}')?;
    if close == 0 {
        return None;
    }
    Some(&key[open + 1..open + 1 + close])
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
