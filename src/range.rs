//! Tracked Ranges
//!
//! A tracked range is one VMA-like span `[start, end)` of one process. It
//! owns a ledger per page size plus its access source, and carries the
//! results of the last job run on it. Ranges are moved whole into worker
//! jobs and back, so nothing here is shared between threads.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::backend::{AccessEvent, PageAccessSource, PageLocator, PageMover, RunKind};
use crate::error::{TierError, TierResult};
use crate::histogram::{Histogram, HistogramBuilder, LocationClass};
use crate::ledger::{AddressLedger, RoundCursor, ScanPosition};
use crate::migrate::{select_candidates, BandwidthThrottle, MigrateWhat, MigrationBatchBuilder, MigrationStats};
use crate::page::PageSize;
use crate::policy::budget::{RangeHistograms, RangeParameters};
use crate::topology::NumaTopology;

/// Range identity: owning process and VMA index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RangeId {
    pub pid: u32,
    pub index: u32,
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.index)
    }
}

/// Settings shared by every range for one configuration generation
#[derive(Debug)]
pub struct RangeEnv {
    pub topology: NumaTopology,
    pub throttle: Arc<BandwidthThrottle>,
    /// Pages per locate and move call
    pub batch_pages: usize,
    pub migrate: MigrateWhat,
}

/// Byte totals of the ledgers after a walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    /// Accessed in the latest round
    pub young: u64,
    /// Accessed in every round so far
    pub top: u64,
    /// Everything tracked
    pub all: u64,
    /// Pages outside the range or lost to allocation failure
    pub dropped: u64,
}

pub struct TrackedRange {
    id: RangeId,
    start: u64,
    end: u64,
    ledgers: [AddressLedger; 2],
    source: Box<dyn PageAccessSource>,
    locator: Arc<dyn PageLocator>,
    mover: Arc<dyn PageMover>,
    env: Arc<RangeEnv>,
    walk: WalkStats,
    histograms: Option<RangeHistograms>,
    migration: MigrationStats,
    last_error: Option<String>,
}

impl TrackedRange {
    pub fn new(
        id: RangeId,
        start: u64,
        end: u64,
        source: Box<dyn PageAccessSource>,
        locator: Arc<dyn PageLocator>,
        mover: Arc<dyn PageMover>,
        env: Arc<RangeEnv>,
    ) -> TierResult<Self> {
        if start >= end || start & (PageSize::Base.bytes() - 1) != 0 {
            return Err(TierError::Config(format!("invalid range {:#x}-{:#x}", start, end)));
        }
        let mut range = Self {
            id,
            start,
            end,
            ledgers: [AddressLedger::new(), AddressLedger::new()],
            source,
            locator,
            mover,
            env,
            walk: WalkStats::default(),
            histograms: None,
            migration: MigrationStats::default(),
            last_error: None,
        };
        range.prepare()?;
        Ok(range)
    }

    pub fn id(&self) -> RangeId {
        self.id
    }

    pub fn bounds(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn ledger(&self, size: PageSize) -> &AddressLedger {
        &self.ledgers[size.index()]
    }

    pub fn walk_stats(&self) -> WalkStats {
        self.walk
    }

    pub fn histograms(&self) -> Option<&RangeHistograms> {
        self.histograms.as_ref()
    }

    pub fn migration_stats(&self) -> &MigrationStats {
        &self.migration
    }

    /// Collaborator failure of the last job, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_env(&mut self, env: Arc<RangeEnv>) {
        self.env = env;
    }

    /// Record a failure of the current job
    pub fn fail(&mut self, reason: String) {
        self.last_error = Some(reason);
    }

    /// Drop the previous cycle's history
    pub fn prepare(&mut self) -> TierResult<()> {
        for size in PageSize::ALL {
            let ledger = &mut self.ledgers[size.index()];
            ledger.clear();
            ledger.set_granularity(size.shift())?;
        }
        self.walk = WalkStats::default();
        self.histograms = None;
        self.migration = MigrationStats::default();
        self.last_error = None;
        Ok(())
    }

    /// Release the ledger arenas for good
    pub fn retire(&mut self) {
        for ledger in &mut self.ledgers {
            ledger.clear();
        }
        self.histograms = None;
        log::debug!("[Scan] range {} retired", self.id);
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    /// One round: feed every observed page of the walk into the ledgers
    pub fn walk_once(&mut self) {
        let id = self.id;
        let (start, end) = (self.start, self.end);
        let Self { ledgers, source, .. } = self;

        let mut cursors: [RoundCursor; 2] = [ledgers[0].begin_round(), ledgers[1].begin_round()];
        let mut va = start;
        let mut dropped = 0u64;
        let mut bad_holes = 0u64;
        let mut alloc_error: Option<TierError> = None;

        let result = source.walk(&mut |event: AccessEvent| match event {
            AccessEvent::Seek(addr) => va = addr,
            AccessEvent::Run { kind, count } => {
                let (size, flag) = match kind {
                    RunKind::Hole { shift } => {
                        match hole_bytes(count, shift) {
                            Some(bytes) => va = va.saturating_add(bytes),
                            None => {
                                // position unknown until the next seek
                                bad_holes += 1;
                                va = u64::MAX;
                            }
                        }
                        return;
                    }
                    RunKind::Idle(size) => (size, 0),
                    RunKind::Accessed(size) => (size, 1),
                };
                let i = size.index();
                for _ in 0..count {
                    if va < start || va >= end {
                        dropped += 1;
                    } else if let Err(e) = ledgers[i].record(&mut cursors[i], va, flag) {
                        dropped += 1;
                        alloc_error.get_or_insert(e);
                    }
                    va = va.saturating_add(size.bytes());
                }
            }
        });

        if let Some(e) = alloc_error {
            log::warn!("[Scan] range {}: {}", id, e);
        }
        if bad_holes > 0 {
            log::warn!("[Scan] range {}: dropped {} holes with an oversized shift", id, bad_holes);
        }
        if let Err(e) = result {
            log::warn!("[Scan] range {} walk failed: {}", id, e);
            self.last_error = Some(e.to_string());
        }

        self.walk = WalkStats {
            young: self.ledgers.iter().map(AddressLedger::young_bytes).sum(),
            top: self.ledgers.iter().map(AddressLedger::top_bytes).sum(),
            all: self.ledgers.iter().map(AddressLedger::total_bytes).sum(),
            dropped: self.walk.dropped + dropped,
        };
    }

    /// Blend counters of neighbouring pages before selection
    pub fn smooth(&mut self) {
        for ledger in &mut self.ledgers {
            ledger.smooth();
        }
    }

    /// Resolve every tracked page's location, then build histograms
    pub fn locate(&mut self) {
        let batch = self.env.batch_pages.max(1);
        let mut addrs = Vec::with_capacity(batch);

        for ledger in &mut self.ledgers {
            let mut cursor = ledger.begin_location_pass();
            let mut pos = ScanPosition::start();
            loop {
                addrs.clear();
                if ledger.next_batch(&mut pos, batch, &mut addrs) == 0 {
                    break;
                }
                let locations = match self.locator.locate(&addrs) {
                    Ok(locations) => locations,
                    Err(e) => {
                        log::warn!("[Scan] range {} locate failed: {}", self.id, e);
                        self.last_error = Some(e.to_string());
                        break;
                    }
                };
                if locations.len() != addrs.len() {
                    log::warn!(
                        "[Scan] range {}: locator returned {} locations for {} pages",
                        self.id,
                        locations.len(),
                        addrs.len()
                    );
                }
                for (&addr, &location) in addrs.iter().zip(&locations) {
                    if let Err(e) = ledger.set_location(&mut cursor, addr, location) {
                        log::warn!("[Scan] range {} set location {:#x}: {}", self.id, addr, e);
                    }
                }
            }
        }

        let builder = HistogramBuilder::new(&self.env.topology);
        let histograms = [
            builder.build(&self.ledgers[PageSize::Base.index()]),
            builder.build(&self.ledgers[PageSize::Huge.index()]),
        ];
        log::debug!(
            "[Scan] range {} located: {} KB fast, {} KB capacity, {} KB unknown",
            self.id,
            histograms.iter().map(|h| h.bytes(LocationClass::FastTier)).sum::<u64>() >> 10,
            histograms.iter().map(|h| h.bytes(LocationClass::CapacityTier)).sum::<u64>() >> 10,
            histograms.iter().map(|h| h.bytes(LocationClass::Unknown)).sum::<u64>() >> 10
        );
        self.histograms = Some(histograms);
    }

    /// Select and move pages according to this cycle's parameters
    pub fn migrate(&mut self, params: &RangeParameters) {
        let env = Arc::clone(&self.env);
        let builder = MigrationBatchBuilder::new(&env.topology, Arc::clone(&env.throttle), env.batch_pages);
        let mut total = MigrationStats::default();

        for size in PageSize::ALL {
            let ledger = &self.ledgers[size.index()];
            let param = &params[size.index()];
            let mut selection = select_candidates(ledger, param, &env.topology, env.migrate);
            builder.run(
                self.mover.as_ref(),
                &selection.hot,
                &selection.cold,
                size.bytes(),
                &mut selection.stats,
            );
            total.merge(&selection.stats);
        }

        if total.promote.to_move + total.demote.to_move > 0 {
            log::debug!(
                "[Migrate] range {}: promoted {} KB, demoted {} KB",
                self.id,
                total.promote.moved >> 10,
                total.demote.moved >> 10
            );
        }
        self.migration = total;
    }

    /// Empty histograms for a range that has not been located yet
    pub fn empty_histograms(&self) -> RangeHistograms {
        [
            Histogram::new(self.ledgers[0].walk_count(), PageSize::Base.shift()),
            Histogram::new(self.ledgers[1].walk_count(), PageSize::Huge.shift()),
        ]
    }
}

impl fmt::Debug for TrackedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedRange")
            .field("id", &self.id)
            .field("start", &format_args!("{:#x}", self.start))
            .field("end", &format_args!("{:#x}", self.end))
            .field("ledgers", &self.ledgers)
            .finish()
    }
}

/// Bytes covered by a hole run, `None` when the shift overflows
fn hole_bytes(count: u32, shift: u8) -> Option<u64> {
    1u64.checked_shl(shift as u32)
        .and_then(|unit| (count as u64).checked_mul(unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PageOutcome;
    use crate::page::LocationId;
    use crate::policy::MigrationParameter;
    use parking_lot::Mutex;

    const PAGE: u64 = 0x1000;

    /// Source replaying a fixed event list every round
    struct Replay(Vec<AccessEvent>);

    impl PageAccessSource for Replay {
        fn walk(&mut self, emit: &mut dyn FnMut(AccessEvent)) -> TierResult<()> {
            for &event in &self.0 {
                emit(event);
            }
            Ok(())
        }
    }

    /// Everything lives on node 1 and moves wherever asked
    #[derive(Default)]
    struct Flat {
        moved: Mutex<Vec<u64>>,
    }

    impl PageLocator for Flat {
        fn locate(&self, addrs: &[u64]) -> TierResult<Vec<LocationId>> {
            Ok(vec![LocationId::new(1); addrs.len()])
        }
    }

    impl PageMover for Flat {
        fn move_pages(&self, addrs: &[u64], targets: &[LocationId]) -> TierResult<Vec<PageOutcome>> {
            self.moved.lock().extend_from_slice(addrs);
            Ok(targets.iter().map(|&t| PageOutcome::Landed(t)).collect())
        }
    }

    fn env() -> Arc<RangeEnv> {
        Arc::new(RangeEnv {
            topology: NumaTopology::two_node(),
            throttle: Arc::new(BandwidthThrottle::unlimited()),
            batch_pages: 4,
            migrate: MigrateWhat::BOTH,
        })
    }

    fn range(events: Vec<AccessEvent>) -> (TrackedRange, Arc<Flat>) {
        let flat = Arc::new(Flat::default());
        let range = TrackedRange::new(
            RangeId { pid: 1, index: 0 },
            0x10000,
            0x20000,
            Box::new(Replay(events)),
            flat.clone(),
            flat.clone(),
            env(),
        )
        .unwrap();
        (range, flat)
    }

    /// Test: runs, holes and out-of-range pages are applied as documented
    #[test]
    fn test_walk_applies_events() {
        let (mut range, _) = range(vec![
            AccessEvent::Seek(0xE000),
            AccessEvent::Run {
                kind: RunKind::Accessed(PageSize::Base),
                count: 4,
            }, // 0xE000, 0xF000 dropped; 0x10000, 0x11000 kept
            AccessEvent::Run {
                kind: RunKind::Hole { shift: 12 },
                count: 2,
            },
            AccessEvent::Run {
                kind: RunKind::Idle(PageSize::Base),
                count: 1,
            }, // 0x14000
            AccessEvent::Seek(0x1F000),
            AccessEvent::Run {
                kind: RunKind::Idle(PageSize::Base),
                count: 3,
            }, // 0x1F000 kept, rest past end
        ]);
        range.walk_once();

        let addrs: Vec<u64> = range.ledger(PageSize::Base).scan_forward().map(|e| e.addr).collect();
        assert_eq!(addrs, vec![0x10000, 0x11000, 0x14000, 0x1F000]);
        let stats = range.walk_stats();
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.young, 2 * PAGE);
        assert_eq!(stats.all, 4 * PAGE);
    }

    /// Test: huge runs land in the 2M ledger
    #[test]
    fn test_walk_huge_pages() {
        let flat = Arc::new(Flat::default());
        let mut range = TrackedRange::new(
            RangeId { pid: 1, index: 1 },
            0x20_0000,
            0x80_0000,
            Box::new(Replay(vec![
                AccessEvent::Seek(0x20_0000),
                AccessEvent::Run {
                    kind: RunKind::Accessed(PageSize::Huge),
                    count: 2,
                },
            ])),
            flat.clone(),
            flat,
            env(),
        )
        .unwrap();
        range.walk_once();
        assert_eq!(range.ledger(PageSize::Huge).len(), 2);
        assert_eq!(range.ledger(PageSize::Base).len(), 0);
    }

    /// Test: walk, locate and migrate a hot range end to end
    #[test]
    fn test_locate_then_migrate() {
        let (mut range, flat) = range(vec![
            AccessEvent::Seek(0x10000),
            AccessEvent::Run {
                kind: RunKind::Accessed(PageSize::Base),
                count: 6,
            },
        ]);
        for _ in 0..3 {
            range.walk_once();
        }
        range.locate();

        let hists = range.histograms().unwrap();
        assert_eq!(hists[0].count(LocationClass::CapacityTier, 3), 6);

        let mut base = MigrationParameter::idle(PageSize::Base, 3);
        base.hot_threshold = 3;
        base.promote_remain = 6;
        let params = [base, MigrationParameter::idle(PageSize::Huge, 3)];
        range.migrate(&params);

        assert_eq!(flat.moved.lock().len(), 6);
        assert_eq!(range.migration_stats().promote.moved, 6 * PAGE);
    }

    /// Test: a hole with an oversized shift is dropped and the walk goes on
    #[test]
    fn test_walk_drops_oversized_hole() {
        let (mut range, _) = range(vec![
            AccessEvent::Seek(0x10000),
            AccessEvent::Run {
                kind: RunKind::Accessed(PageSize::Base),
                count: 1,
            },
            AccessEvent::Run {
                kind: RunKind::Hole { shift: 64 },
                count: 3,
            },
            AccessEvent::Run {
                kind: RunKind::Idle(PageSize::Base),
                count: 1,
            }, // position unknown, dropped
            AccessEvent::Seek(0x12000),
            AccessEvent::Run {
                kind: RunKind::Idle(PageSize::Base),
                count: 1,
            },
        ]);
        range.walk_once();

        let addrs: Vec<u64> = range.ledger(PageSize::Base).scan_forward().map(|e| e.addr).collect();
        assert_eq!(addrs, vec![0x10000, 0x12000]);
        assert_eq!(range.walk_stats().dropped, 1);
        assert!(range.last_error().is_none());
    }

    #[test]
    fn test_hole_bytes() {
        assert_eq!(hole_bytes(2, 12), Some(0x2000));
        assert_eq!(hole_bytes(1, 63), Some(1 << 63));
        assert_eq!(hole_bytes(2, 63), None);
        assert_eq!(hole_bytes(1, 64), None);
        assert_eq!(hole_bytes(1, u8::MAX), None);
    }

    /// Locator answering for only the first page of each batch
    struct Short;

    impl PageLocator for Short {
        fn locate(&self, addrs: &[u64]) -> TierResult<Vec<LocationId>> {
            Ok(addrs.iter().take(1).map(|_| LocationId::new(0)).collect())
        }
    }

    /// Test: a short locator answer leaves the remaining pages unknown
    #[test]
    fn test_locate_short_answer() {
        let flat = Arc::new(Flat::default());
        let mut range = TrackedRange::new(
            RangeId { pid: 1, index: 2 },
            0x10000,
            0x20000,
            Box::new(Replay(vec![
                AccessEvent::Seek(0x10000),
                AccessEvent::Run {
                    kind: RunKind::Accessed(PageSize::Base),
                    count: 6,
                },
            ])),
            Arc::new(Short),
            flat,
            env(),
        )
        .unwrap();
        range.walk_once();
        range.locate();

        // batch_pages = 4: one located page per batch of 4 and 2
        let hists = range.histograms().unwrap();
        assert_eq!(hists[0].total(LocationClass::FastTier), 2);
        assert_eq!(hists[0].total(LocationClass::Unknown), 4);
    }

    #[test]
    fn test_prepare_resets_history() {
        let (mut range, _) = range(vec![
            AccessEvent::Seek(0x10000),
            AccessEvent::Run {
                kind: RunKind::Idle(PageSize::Base),
                count: 2,
            },
        ]);
        range.walk_once();
        range.prepare().unwrap();
        assert!(range.ledger(PageSize::Base).is_empty());
        assert_eq!(range.ledger(PageSize::Base).walk_count(), 0);
        assert_eq!(range.walk_stats(), WalkStats::default());
    }

    #[test]
    fn test_invalid_bounds() {
        let flat = Arc::new(Flat::default());
        let result = TrackedRange::new(
            RangeId { pid: 1, index: 0 },
            0x2000,
            0x1000,
            Box::new(Replay(Vec::new())),
            flat.clone(),
            flat,
            env(),
        );
        assert!(result.is_err());
    }
}
