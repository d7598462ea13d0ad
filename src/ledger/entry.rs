//! Packed ledger records
//!
//! ## Encoding
//!
//! ```text
//!   Cluster { start = 0x10000, last = 0x16000 }  (page shift 12)
//!
//!   entry   delta  counter  location      absolute address
//!   [0]       0       3      node0         0x10000  (= start)
//!   [1]       1       0      node1         0x11000
//!   [2]       5       7      unknown       0x16000
//! ```
//!
//! Saturation rules:
//! - `delta` is the page-unit gap to the previous entry and is at most 255.
//!   A larger gap closes the cluster, so it never needs to saturate.
//! - `counter` increments saturate at 255. Readers clamp it to the ledger's
//!   walk count, which absorbs double accounting when VMAs shift mid-scan.

use crate::page::LocationId;

/// Largest page gap one entry can encode
pub const MAX_DELTA: u64 = u8::MAX as u64;

/// One observed page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Entry {
    pub delta: u8,
    pub counter: u8,
    pub location: LocationId,
}

impl Entry {
    pub fn new(delta: u8, counter: u8) -> Self {
        Self {
            delta,
            counter,
            location: LocationId::UNKNOWN,
        }
    }

    /// Count one more access, saturating at 255. Returns the new value.
    pub fn bump(&mut self) -> u8 {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    /// Counter as seen by readers of a ledger with `walk_count` rounds
    pub fn clamped(&self, walk_count: u8) -> u8 {
        self.counter.min(walk_count)
    }
}

/// A run of entries that are close enough to share 8-bit deltas.
///
/// The entries live contiguously in segment `segment` of the arena at
/// `[offset, offset + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cluster {
    /// Address of the first entry
    pub start: u64,
    /// Address of the last entry
    pub last: u64,
    pub segment: u32,
    pub offset: u32,
    pub len: u32,
}

impl Cluster {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.last
    }
}
