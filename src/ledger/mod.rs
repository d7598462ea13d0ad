//! Address Ledger
//!
//! A sparse ordered array of observed virtual pages. One ledger per tracked
//! range and page size; each entry holds an access counter accumulated over
//! up to 255 rounds plus the location id found by the post-walk locate pass.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ clusters: [ C0 ][ C1 ][ C2 ] ...   (address ascending, disjoint)     │
//! │             │     │     │                                            │
//! │             ▼     ▼     ▼                                            │
//! │ arena:  ┌────────────────────────┐ ┌────────────────────────┐        │
//! │         │ seg 0: C0 C0 C0 C1 C1  │ │ seg 1: C2 C2 C2 ...    │        │
//! │         └────────────────────────┘ └────────────────────────┘        │
//! │   each entry = (delta u8, counter u8, location u8) = 3 bytes         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Addresses have strong spatial locality inside a VMA, so clustering with
//! 8-bit deltas keeps the cost near 3 bytes per page.
//!
//! ## Access protocols
//!
//! - **Append** (`walk_count < 2`): addresses arrive strictly ascending and
//!   are appended. Anything at or below the last address is a duplicate.
//! - **Update** (`walk_count >= 2`): addresses arrive non-decreasing and are
//!   merged against existing entries with a forward-only cursor. Unknown
//!   addresses are not inserted.
//!
//! The ledger does no locking. One thread owns it at a time.

pub mod arena;
pub mod cursor;
pub mod entry;

pub use arena::{SegmentArena, SEGMENT_BYTES, SEGMENT_ENTRIES};
pub use cursor::{LocationCursor, RoundCursor, ScanPosition};
pub use entry::{Cluster, Entry, MAX_DELTA};

use crate::error::{TierError, TierResult};
use crate::page::{LocationId, PageSize, BASE_PAGE_SHIFT};
use cursor::Position;

/// Inter-entry gap (in pages) above which smoothing restarts
pub const SMOOTH_RESTART_GAP: u64 = 3;

/// Highest walk count a one-byte counter can represent
pub const MAX_WALKS: u8 = u8::MAX;

/// Outcome of a single ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// New entry appended
    Inserted,
    /// Existing entry matched
    Updated,
    /// Append at or below the last address; ignored
    Duplicate,
    /// Update-mode address not present in the ledger
    NotFound,
    /// Address not aligned to the ledger granularity; ignored
    Misaligned,
}

/// One ledger entry as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub addr: u64,
    pub counter: u8,
    pub location: LocationId,
}

/// Per-address access history
pub struct AddressLedger {
    page_shift: u8,
    walk_count: u8,
    len: usize,
    young_bytes: u64,
    top_bytes: u64,
    misaligned: u64,
    last_addr: Option<u64>,
    clusters: Vec<Cluster>,
    arena: SegmentArena,
    round_epoch: u64,
    location_epoch: u64,
}

impl AddressLedger {
    pub fn new() -> Self {
        Self::with_arena(SegmentArena::new())
    }

    /// Ledger whose arena may hold at most `limit` segments
    pub fn with_segment_limit(limit: usize) -> Self {
        Self::with_arena(SegmentArena::with_limit(limit))
    }

    fn with_arena(arena: SegmentArena) -> Self {
        Self {
            page_shift: BASE_PAGE_SHIFT,
            walk_count: 0,
            len: 0,
            young_bytes: 0,
            top_bytes: 0,
            misaligned: 0,
            last_addr: None,
            clusters: Vec::new(),
            arena,
            round_epoch: 0,
            location_epoch: 0,
        }
    }

    /// Fix the page granularity. Must precede the first insert.
    pub fn set_granularity(&mut self, page_shift: u8) -> TierResult<()> {
        if PageSize::from_shift(page_shift).is_none() {
            return Err(TierError::InvalidPageShift(page_shift));
        }
        if !self.is_empty() && page_shift != self.page_shift {
            return Err(TierError::GranularityLocked {
                current: self.page_shift,
                requested: page_shift,
            });
        }
        self.page_shift = page_shift;
        Ok(())
    }

    /// Start a new round and hand out its update cursor
    pub fn begin_round(&mut self) -> RoundCursor {
        if self.walk_count == MAX_WALKS {
            log::debug!("[Ledger] walk count saturated at {}", MAX_WALKS);
        } else {
            self.walk_count += 1;
        }
        self.young_bytes = 0;
        self.top_bytes = 0;
        self.round_epoch += 1;

        RoundCursor {
            pos: Position::start(self.clusters.first().map(|c| c.start)),
            generation: self.round_epoch,
        }
    }

    /// Record one observation of `addr`. `flag != 0` means accessed.
    ///
    /// Errors only when the arena cannot grow; the address is then dropped.
    pub fn record(&mut self, cursor: &mut RoundCursor, addr: u64, flag: u8) -> TierResult<RecordStatus> {
        if cursor.generation != self.round_epoch {
            return Err(TierError::StaleCursor);
        }
        if addr & (self.page_size() - 1) != 0 {
            self.misaligned += 1;
            log::warn!("[Ledger] ignoring unaligned address {:#x} (page shift {})", addr, self.page_shift);
            return Ok(RecordStatus::Misaligned);
        }

        if self.walk_count < 2 {
            self.append(addr, flag)
        } else {
            Ok(self.update(&mut cursor.pos, addr, flag))
        }
    }

    /// Start the post-walk location pass
    pub fn begin_location_pass(&mut self) -> LocationCursor {
        self.location_epoch += 1;
        LocationCursor {
            pos: Position::start(self.clusters.first().map(|c| c.start)),
            generation: self.location_epoch,
        }
    }

    /// Store the location id of `addr`. Same ordering contract as update mode.
    pub fn set_location(
        &mut self,
        cursor: &mut LocationCursor,
        addr: u64,
        location: LocationId,
    ) -> TierResult<RecordStatus> {
        if cursor.generation != self.location_epoch {
            return Err(TierError::StaleCursor);
        }
        match self.seek(&mut cursor.pos, addr) {
            Some((ci, idx)) => {
                self.entry_mut(ci, idx).location = location;
                Ok(RecordStatus::Updated)
            }
            None => Ok(RecordStatus::NotFound),
        }
    }

    /// Exponential moving average over neighbouring counters.
    ///
    /// Restarts at every cluster start and wherever the gap to the previous
    /// entry exceeds [`SMOOTH_RESTART_GAP`] pages.
    pub fn smooth(&mut self) {
        for cluster in &self.clusters {
            let entries = self.arena.slice_mut(cluster.segment, cluster.offset, cluster.len);
            let mut avg: u16 = 0;
            for (i, entry) in entries.iter_mut().enumerate() {
                if i == 0 || entry.delta as u64 > SMOOTH_RESTART_GAP {
                    avg = entry.counter as u16;
                } else {
                    avg = (avg + entry.counter as u16 + 1) / 2;
                }
                entry.counter = avg as u8;
            }
        }
    }

    /// Forward iterator over all entries. Call again to restart.
    pub fn scan_forward(&self) -> LedgerIter<'_> {
        LedgerIter {
            ledger: self,
            pos: ScanPosition::start(),
        }
    }

    /// Read the entry at `pos` and advance it
    pub fn next_entry(&self, pos: &mut ScanPosition) -> Option<LedgerEntry> {
        loop {
            let cluster = self.clusters.get(pos.cluster)?;
            if pos.index >= cluster.len {
                pos.cluster += 1;
                pos.index = 0;
                continue;
            }
            let entry = self.arena.slice(cluster.segment, cluster.offset, cluster.len)[pos.index as usize];
            pos.addr = if pos.index == 0 {
                cluster.start
            } else {
                pos.addr + ((entry.delta as u64) << self.page_shift)
            };
            pos.index += 1;
            return Some(LedgerEntry {
                addr: pos.addr,
                counter: entry.counter,
                location: entry.location,
            });
        }
    }

    /// Append up to `max` addresses starting at `pos`. Returns how many.
    pub fn next_batch(&self, pos: &mut ScanPosition, max: usize, out: &mut Vec<u64>) -> usize {
        let mut n = 0;
        while n < max {
            match self.next_entry(pos) {
                Some(entry) => {
                    out.push(entry.addr);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Drop all entries and release the arena
    pub fn clear(&mut self) {
        self.clusters = Vec::new();
        self.arena.release_all();
        self.len = 0;
        self.walk_count = 0;
        self.young_bytes = 0;
        self.top_bytes = 0;
        self.misaligned = 0;
        self.last_addr = None;
        self.round_epoch += 1;
        self.location_epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn walk_count(&self) -> u8 {
        self.walk_count
    }

    pub fn page_shift(&self) -> u8 {
        self.page_shift
    }

    pub fn page_size(&self) -> u64 {
        1u64 << self.page_shift
    }

    /// Bytes of pages accessed in the current round
    pub fn young_bytes(&self) -> u64 {
        self.young_bytes
    }

    /// Bytes of pages accessed in every round so far
    pub fn top_bytes(&self) -> u64 {
        self.top_bytes
    }

    /// Bytes covered by all entries
    pub fn total_bytes(&self) -> u64 {
        (self.len as u64) << self.page_shift
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn segment_count(&self) -> usize {
        self.arena.segment_count()
    }

    /// Misaligned addresses ignored since the last clear
    pub fn misaligned(&self) -> u64 {
        self.misaligned
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn append(&mut self, addr: u64, flag: u8) -> TierResult<RecordStatus> {
        if let Some(last) = self.last_addr {
            if addr <= last {
                return Ok(RecordStatus::Duplicate);
            }
        }

        let counter = u8::from(flag != 0);
        let gap = self.last_addr.map(|last| (addr - last) >> self.page_shift);

        let delta = gap.filter(|&g| g <= MAX_DELTA && self.arena.has_room());

        if let (Some(delta), Some(cluster)) = (delta, self.clusters.last_mut()) {
            self.arena.push(Entry::new(delta as u8, counter));
            cluster.last = addr;
            cluster.len += 1;
        } else {
            self.clusters.try_reserve(1)?;
            let slot = self.arena.next_slot()?;
            self.arena.push(Entry::new(0, counter));
            self.clusters.push(Cluster {
                start: addr,
                last: addr,
                segment: slot.segment,
                offset: slot.offset,
                len: 1,
            });
        }

        self.len += 1;
        self.last_addr = Some(addr);
        if counter != 0 {
            self.young_bytes += self.page_size();
        }
        Ok(RecordStatus::Inserted)
    }

    fn update(&mut self, pos: &mut Position, addr: u64, flag: u8) -> RecordStatus {
        let Some((ci, idx)) = self.seek(pos, addr) else {
            return RecordStatus::NotFound;
        };
        if flag != 0 {
            let page_size = self.page_size();
            let walk_count = self.walk_count;
            let counter = self.entry_mut(ci, idx).bump();
            self.young_bytes += page_size;
            if counter == walk_count {
                self.top_bytes += page_size;
            }
        }
        RecordStatus::Updated
    }

    /// Forward merge scan from `pos`. Leaves `pos` on the first entry at or
    /// after `addr`.
    fn seek(&self, pos: &mut Position, addr: u64) -> Option<(usize, usize)> {
        if addr < pos.high_water {
            log::debug!(
                "[Ledger] out-of-order lookup {:#x} after {:#x}, rescanning",
                addr,
                pos.high_water
            );
            return self.lookup(addr);
        }
        pos.high_water = addr;

        while let Some(cluster) = self.clusters.get(pos.cluster) {
            if addr > cluster.last {
                pos.cluster += 1;
                pos.index = 0;
                pos.addr = self.clusters.get(pos.cluster).map(|c| c.start).unwrap_or(u64::MAX);
                continue;
            }
            if addr < pos.addr {
                return None;
            }
            // addr <= cluster.last, so the walk stays inside this cluster
            let entries = self.arena.slice(cluster.segment, cluster.offset, cluster.len);
            while pos.addr < addr {
                pos.index += 1;
                pos.addr += (entries[pos.index as usize].delta as u64) << self.page_shift;
            }
            return (pos.addr == addr).then_some((pos.cluster, pos.index as usize));
        }
        None
    }

    /// Linear lookup from the start, used when the ordering contract is broken
    fn lookup(&self, addr: u64) -> Option<(usize, usize)> {
        let ci = self.clusters.iter().position(|c| c.contains(addr))?;
        let cluster = &self.clusters[ci];
        let entries = self.arena.slice(cluster.segment, cluster.offset, cluster.len);
        let mut cur = cluster.start;
        for (i, entry) in entries.iter().enumerate() {
            cur += (entry.delta as u64) << self.page_shift;
            if cur == addr {
                return Some((ci, i));
            }
            if cur > addr {
                break;
            }
        }
        None
    }

    fn entry_mut(&mut self, ci: usize, idx: usize) -> &mut Entry {
        let cluster = self.clusters[ci];
        &mut self.arena.slice_mut(cluster.segment, cluster.offset, cluster.len)[idx]
    }
}

impl Default for AddressLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AddressLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressLedger")
            .field("page_shift", &self.page_shift)
            .field("walk_count", &self.walk_count)
            .field("len", &self.len)
            .field("clusters", &self.clusters.len())
            .field("segments", &self.arena.segment_count())
            .finish()
    }
}

/// Lazy forward iterator returned by [`AddressLedger::scan_forward`]
pub struct LedgerIter<'a> {
    ledger: &'a AddressLedger,
    pos: ScanPosition,
}

impl Iterator for LedgerIter<'_> {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<LedgerEntry> {
        self.ledger.next_entry(&mut self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 0x1000;

    /// Helper: one append round over `addrs`
    fn appended(addrs: &[u64], flag: u8) -> AddressLedger {
        let mut ledger = AddressLedger::new();
        ledger.set_granularity(12).unwrap();
        let mut cursor = ledger.begin_round();
        for &addr in addrs {
            assert_eq!(ledger.record(&mut cursor, addr, flag).unwrap(), RecordStatus::Inserted);
        }
        ledger
    }

    fn counter_of(ledger: &AddressLedger, addr: u64) -> Option<u8> {
        ledger.scan_forward().find(|e| e.addr == addr).map(|e| e.counter)
    }

    /// Test: append then scan yields the same addresses and flags in order
    #[test]
    fn test_append_scan_roundtrip() {
        let addrs: Vec<u64> = (0..1000u64).map(|i| 0x40_0000 + i * i % 7 * PAGE + i * 3 * PAGE).collect();
        let mut sorted = addrs.clone();
        sorted.sort_unstable();
        sorted.dedup();

        let ledger = appended(&sorted, 1);
        let scanned: Vec<LedgerEntry> = ledger.scan_forward().collect();

        assert_eq!(scanned.len(), sorted.len());
        for (entry, addr) in scanned.iter().zip(&sorted) {
            assert_eq!(entry.addr, *addr);
            assert_eq!(entry.counter, 1);
            assert_eq!(entry.location, LocationId::UNKNOWN);
        }
    }

    /// Test: re-inserting the last or an earlier address is a duplicate
    #[test]
    fn test_append_duplicate_is_ignored() {
        let mut ledger = AddressLedger::new();
        let mut cursor = ledger.begin_round();
        ledger.record(&mut cursor, 0x2000, 1).unwrap();
        ledger.record(&mut cursor, 0x5000, 0).unwrap();

        assert_eq!(ledger.record(&mut cursor, 0x5000, 1).unwrap(), RecordStatus::Duplicate);
        assert_eq!(ledger.record(&mut cursor, 0x2000, 1).unwrap(), RecordStatus::Duplicate);
        assert_eq!(ledger.record(&mut cursor, 0x1000, 1).unwrap(), RecordStatus::Duplicate);
        assert_eq!(ledger.len(), 2);
        // first seen wins
        assert_eq!(counter_of(&ledger, 0x5000), Some(0));
    }

    /// Test: update-mode increments by exactly k and flips top_bytes at walk_count
    #[test]
    fn test_update_increments_and_top_bytes() {
        let mut ledger = appended(&[0x1000, 0x2000, 0x3000], 0);
        let mut cursor = ledger.begin_round(); // walk_count = 2

        assert_eq!(ledger.record(&mut cursor, 0x2000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x2000), Some(1));
        assert_eq!(ledger.top_bytes(), 0, "counter 1 < walk_count 2");

        assert_eq!(ledger.record(&mut cursor, 0x2000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x2000), Some(2));
        assert_eq!(ledger.top_bytes(), PAGE, "counter reached walk_count");
        assert_eq!(ledger.young_bytes(), 2 * PAGE);

        assert_eq!(ledger.record(&mut cursor, 0x2000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x2000), Some(3));
        assert_eq!(ledger.top_bytes(), PAGE, "top turns on once");
        assert_eq!(ledger.len(), 3);
    }

    /// Test: idle observations match but never bump the counter
    #[test]
    fn test_update_idle_does_not_count() {
        let mut ledger = appended(&[0x1000, 0x2000], 1);
        let mut cursor = ledger.begin_round();
        assert_eq!(ledger.record(&mut cursor, 0x1000, 0).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x1000), Some(1));
        assert_eq!(ledger.young_bytes(), 0);
    }

    /// Test: update miss leaves the ledger untouched
    #[test]
    fn test_update_miss_is_not_found() {
        let mut ledger = appended(&[0x1000, 0x3000, 0x5000], 1);
        let before: Vec<LedgerEntry> = ledger.scan_forward().collect();
        let mut cursor = ledger.begin_round();

        assert_eq!(ledger.record(&mut cursor, 0x2000, 1).unwrap(), RecordStatus::NotFound);
        assert_eq!(ledger.record(&mut cursor, 0x4000, 1).unwrap(), RecordStatus::NotFound);
        assert_eq!(ledger.record(&mut cursor, 0x9000, 1).unwrap(), RecordStatus::NotFound);

        let after: Vec<LedgerEntry> = ledger.scan_forward().collect();
        assert_eq!(before, after);
        assert_eq!(ledger.len(), 3);
    }

    /// Test: the concrete 4K scenario
    #[test]
    fn test_concrete_scenario() {
        let mut ledger = AddressLedger::new();
        ledger.set_granularity(12).unwrap();
        let mut cursor = ledger.begin_round();
        for addr in [0x1000, 0x3000, 0x5000, 0x8000] {
            ledger.record(&mut cursor, addr, 0).unwrap();
        }
        assert_eq!(ledger.len(), 4);

        let mut cursor = ledger.begin_round();
        assert_eq!(ledger.record(&mut cursor, 0x3000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x3000), Some(1));
        assert_eq!(ledger.len(), 4);

        assert_eq!(ledger.record(&mut cursor, 0x9000, 1).unwrap(), RecordStatus::NotFound);
        assert_eq!(ledger.len(), 4);
    }

    /// Test: gaps above 255 pages open a new cluster and scan stays exact
    #[test]
    fn test_cluster_boundary() {
        let a = 0x10_0000;
        let b = a + MAX_DELTA * PAGE; // still fits
        let c = b + (MAX_DELTA + 1) * PAGE; // forces a new cluster
        let d = c + PAGE;
        let ledger = appended(&[a, b, c, d], 1);

        assert_eq!(ledger.cluster_count(), 2);
        let scanned: Vec<u64> = ledger.scan_forward().map(|e| e.addr).collect();
        assert_eq!(scanned, vec![a, b, c, d]);
    }

    /// Test: update walks across cluster boundaries
    #[test]
    fn test_update_across_clusters() {
        let addrs = [0x1000, 0x1000 + 300 * PAGE, 0x1000 + 301 * PAGE, 0x1000 + 900 * PAGE];
        let mut ledger = appended(&addrs, 0);
        assert_eq!(ledger.cluster_count(), 3);

        let mut cursor = ledger.begin_round();
        for addr in addrs {
            assert_eq!(ledger.record(&mut cursor, addr, 1).unwrap(), RecordStatus::Updated);
        }
        assert!(ledger.scan_forward().all(|e| e.counter == 1));
    }

    /// Test: out-of-order update still finds the entry without moving the cursor
    #[test]
    fn test_out_of_order_update_falls_back() {
        let mut ledger = appended(&[0x1000, 0x2000, 0x3000], 0);
        let mut cursor = ledger.begin_round();

        ledger.record(&mut cursor, 0x3000, 1).unwrap();
        assert_eq!(ledger.record(&mut cursor, 0x1000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x1000), Some(1));
        // forward progress continues from where it was
        assert_eq!(ledger.record(&mut cursor, 0x3000, 1).unwrap(), RecordStatus::Updated);
        assert_eq!(counter_of(&ledger, 0x3000), Some(2));
    }

    /// Test: misaligned addresses are ignored
    #[test]
    fn test_misaligned_is_ignored() {
        let mut ledger = AddressLedger::new();
        ledger.set_granularity(21).unwrap();
        let mut cursor = ledger.begin_round();
        assert_eq!(ledger.record(&mut cursor, 0x1000, 1).unwrap(), RecordStatus::Misaligned);
        assert_eq!(ledger.record(&mut cursor, 0x20_0000, 1).unwrap(), RecordStatus::Inserted);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.misaligned(), 1);
    }

    /// Test: granularity is fixed once entries exist
    #[test]
    fn test_granularity_lock() {
        let mut ledger = appended(&[0x1000], 1);
        assert!(matches!(
            ledger.set_granularity(21),
            Err(TierError::GranularityLocked { current: 12, requested: 21 })
        ));
        assert!(ledger.set_granularity(12).is_ok());
        assert!(matches!(ledger.set_granularity(13), Err(TierError::InvalidPageShift(13))));

        ledger.clear();
        assert!(ledger.set_granularity(21).is_ok());
    }

    /// Test: cursors from an earlier round are rejected
    #[test]
    fn test_stale_cursor() {
        let mut ledger = AddressLedger::new();
        let mut old = ledger.begin_round();
        let _new = ledger.begin_round();
        assert!(matches!(ledger.record(&mut old, 0x1000, 1), Err(TierError::StaleCursor)));
    }

    /// Test: arena exhaustion fails the one insert and keeps the rest
    #[test]
    fn test_arena_exhaustion() {
        let mut ledger = AddressLedger::with_segment_limit(1);
        let mut cursor = ledger.begin_round();
        for i in 0..SEGMENT_ENTRIES as u64 {
            ledger.record(&mut cursor, (i + 1) * PAGE, 1).unwrap();
        }
        let next = (SEGMENT_ENTRIES as u64 + 1) * PAGE;
        assert!(matches!(
            ledger.record(&mut cursor, next, 1),
            Err(TierError::ArenaExhausted { limit: 1 })
        ));
        assert_eq!(ledger.len(), SEGMENT_ENTRIES);
        assert_eq!(ledger.segment_count(), 1);
    }

    /// Test: a full segment closes the cluster even for dense addresses
    #[test]
    fn test_full_segment_starts_new_cluster() {
        let mut ledger = AddressLedger::new();
        let mut cursor = ledger.begin_round();
        for i in 0..=SEGMENT_ENTRIES as u64 {
            ledger.record(&mut cursor, (i + 1) * PAGE, 0).unwrap();
        }
        assert_eq!(ledger.cluster_count(), 2);
        assert_eq!(ledger.segment_count(), 2);
        let last = ledger.scan_forward().last().unwrap();
        assert_eq!(last.addr, (SEGMENT_ENTRIES as u64 + 1) * PAGE);
    }

    /// Test: the location pass writes ids through its own cursor
    #[test]
    fn test_location_pass() {
        let mut ledger = appended(&[0x1000, 0x2000, 0x9000], 1);
        let mut cursor = ledger.begin_location_pass();

        assert_eq!(
            ledger.set_location(&mut cursor, 0x1000, LocationId::new(0)).unwrap(),
            RecordStatus::Updated
        );
        assert_eq!(
            ledger.set_location(&mut cursor, 0x5000, LocationId::new(1)).unwrap(),
            RecordStatus::NotFound
        );
        assert_eq!(
            ledger.set_location(&mut cursor, 0x9000, LocationId::new(1)).unwrap(),
            RecordStatus::Updated
        );

        let locations: Vec<LocationId> = ledger.scan_forward().map(|e| e.location).collect();
        assert_eq!(locations, vec![LocationId::new(0), LocationId::UNKNOWN, LocationId::new(1)]);
    }

    /// Test: batched reads resume where they stopped
    #[test]
    fn test_next_batch_resumes() {
        let addrs: Vec<u64> = (1..=10).map(|i| i * 400 * PAGE).collect();
        let ledger = appended(&addrs, 0);
        let mut pos = ScanPosition::start();
        let mut out = Vec::new();

        assert_eq!(ledger.next_batch(&mut pos, 4, &mut out), 4);
        assert_eq!(ledger.next_batch(&mut pos, 4, &mut out), 4);
        assert_eq!(ledger.next_batch(&mut pos, 4, &mut out), 2);
        assert_eq!(ledger.next_batch(&mut pos, 4, &mut out), 0);
        assert_eq!(out, addrs);
    }

    /// Test: smoothing averages dense neighbours and restarts on gaps
    #[test]
    fn test_smooth() {
        let mut ledger = AddressLedger::new();
        let mut cursor = ledger.begin_round();
        ledger.record(&mut cursor, 0x1000, 0).unwrap();
        ledger.record(&mut cursor, 0x2000, 0).unwrap();
        ledger.record(&mut cursor, 0x9000, 0).unwrap(); // gap of 7 pages

        for _ in 0..4 {
            let mut cursor = ledger.begin_round();
            ledger.record(&mut cursor, 0x1000, 1).unwrap();
            ledger.record(&mut cursor, 0x9000, 1).unwrap();
        }
        assert_eq!(counter_of(&ledger, 0x1000), Some(4));
        assert_eq!(counter_of(&ledger, 0x2000), Some(0));

        ledger.smooth();
        assert_eq!(counter_of(&ledger, 0x1000), Some(4));
        assert_eq!(counter_of(&ledger, 0x2000), Some(2));
        assert_eq!(counter_of(&ledger, 0x9000), Some(4), "restart after gap");
    }

    /// Test: walk count saturates at 255
    #[test]
    fn test_walk_count_cap() {
        let mut ledger = AddressLedger::new();
        for _ in 0..300 {
            ledger.begin_round();
        }
        assert_eq!(ledger.walk_count(), MAX_WALKS);
    }

    /// Test: clear releases everything
    #[test]
    fn test_clear() {
        let mut ledger = appended(&[0x1000, 0x80_0000], 1);
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.walk_count(), 0);
        assert_eq!(ledger.segment_count(), 0);
        assert_eq!(ledger.scan_forward().count(), 0);
    }
}
