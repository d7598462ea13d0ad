//! Synthetic Backend
//!
//! Deterministic stand-ins for the page table walker, the page locator and
//! the page mover, driven by a seeded [`StdRng`].
//!
//! ```text
//!   SimSource (one per range)         SimMemory (shared)
//!   ┌──────────────────────────┐      ┌───────────────────────┐
//!   │ layout: 4K / 2M / hole   │      │ addr -> node          │
//!   │ hot set, access odds     │      │ locate / move_pages   │
//!   └──────────┬───────────────┘      └──────────┬────────────┘
//!              └── AccessEvent ─► TrackedRange ◄─┘
//! ```
//!
//! The workload is read from a `[workload]` section next to the regular
//! configuration sections.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::backend::{AccessEvent, PageAccessSource, PageLocator, PageMover, PageOutcome, RunKind};
use crate::cycle::CycleController;
use crate::error::{TierError, TierResult};
use crate::page::{LocationId, PageSize};
use crate::range::RangeId;
use crate::topology::{NumaTopology, Tier};

/// Base of the first simulated range
const SIM_BASE: u64 = 0x7f00_0000_0000;

/// Synthetic workload shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub seed: u64,
    pub processes: u32,
    pub ranges_per_process: u32,
    /// Size of every range, rounded up to 2 MB
    pub range_mb: u64,
    /// Share of 2 MB chunks mapped as one huge page
    pub huge_percent: u8,
    /// Share of 4K slots left unmapped
    pub hole_percent: u8,
    /// Share of mapped pages in the hot set
    pub hot_percent: u8,
    /// Per-round access odds of a hot page
    pub hot_access_percent: u8,
    /// Per-round access odds of any other page
    pub cold_access_percent: u8,
    /// Share of pages initially placed in the fast tier
    pub initial_fast_percent: u8,
    /// Odds that a single page move is refused with EBUSY
    pub move_failure_percent: u8,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            processes: 2,
            ranges_per_process: 2,
            range_mb: 16,
            huge_percent: 10,
            hole_percent: 5,
            hot_percent: 20,
            hot_access_percent: 95,
            cold_access_percent: 5,
            initial_fast_percent: 50,
            move_failure_percent: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadFile {
    #[serde(default)]
    workload: WorkloadConfig,
}

impl WorkloadConfig {
    /// `[workload]` section of a config file; missing section means defaults
    pub fn load(path: impl AsRef<Path>) -> TierResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> TierResult<Self> {
        let file: WorkloadFile = toml::from_str(text)?;
        file.workload.validate()?;
        Ok(file.workload)
    }

    pub fn validate(&self) -> TierResult<()> {
        let percents = [
            ("huge_percent", self.huge_percent),
            ("hole_percent", self.hole_percent),
            ("hot_percent", self.hot_percent),
            ("hot_access_percent", self.hot_access_percent),
            ("cold_access_percent", self.cold_access_percent),
            ("initial_fast_percent", self.initial_fast_percent),
            ("move_failure_percent", self.move_failure_percent),
        ];
        for (name, value) in percents {
            if value > 100 {
                return Err(TierError::Config(format!("workload.{} {} not in [0, 100]", name, value)));
            }
        }
        if self.range_mb == 0 {
            return Err(TierError::Config("workload.range_mb must be at least 1".into()));
        }
        Ok(())
    }

    fn range_bytes(&self) -> u64 {
        let huge = PageSize::Huge.bytes();
        ((self.range_mb << 20) + huge - 1) & !(huge - 1)
    }
}

fn roll(rng: &mut StdRng, percent: u8) -> bool {
    rng.gen_range(0..100u32) < percent as u32
}

// ============================================================================
// Memory
// ============================================================================

/// Page placement shared by every simulated range
pub struct SimMemory {
    pages: Mutex<HashMap<u64, LocationId>>,
    rng: Mutex<StdRng>,
    move_failure_percent: u8,
}

impl SimMemory {
    pub fn new(seed: u64, move_failure_percent: u8) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            move_failure_percent,
        }
    }

    pub fn place(&self, addr: u64, location: LocationId) {
        self.pages.lock().insert(addr, location);
    }

    pub fn location(&self, addr: u64) -> LocationId {
        self.pages.lock().get(&addr).copied().unwrap_or(LocationId::UNKNOWN)
    }

    /// Mapped pages per node
    pub fn census(&self) -> BTreeMap<LocationId, usize> {
        let mut census = BTreeMap::new();
        for &location in self.pages.lock().values() {
            *census.entry(location).or_insert(0) += 1;
        }
        census
    }
}

impl PageLocator for SimMemory {
    fn locate(&self, addrs: &[u64]) -> TierResult<Vec<LocationId>> {
        let pages = self.pages.lock();
        Ok(addrs
            .iter()
            .map(|addr| pages.get(addr).copied().unwrap_or(LocationId::UNKNOWN))
            .collect())
    }
}

impl PageMover for SimMemory {
    fn move_pages(&self, addrs: &[u64], targets: &[LocationId]) -> TierResult<Vec<PageOutcome>> {
        if addrs.len() != targets.len() {
            return Err(TierError::Move(format!(
                "{} addresses for {} targets",
                addrs.len(),
                targets.len()
            )));
        }
        let mut pages = self.pages.lock();
        let mut rng = self.rng.lock();
        let outcomes = addrs
            .iter()
            .zip(targets)
            .map(|(addr, &target)| match pages.get_mut(addr) {
                None => PageOutcome::Error(libc::EFAULT),
                Some(_) if roll(&mut rng, self.move_failure_percent) => PageOutcome::Error(libc::EBUSY),
                Some(location) => {
                    *location = target;
                    PageOutcome::Landed(target)
                }
            })
            .collect();
        Ok(outcomes)
    }
}

// ============================================================================
// Access source
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Hole,
    Page { size: PageSize, hot: bool },
}

/// Replays one range's layout each round with fresh access bits
pub struct SimSource {
    start: u64,
    slots: Vec<Slot>,
    rng: StdRng,
    hot_access_percent: u8,
    cold_access_percent: u8,
}

impl SimSource {
    /// Lay out `[start, start + len)` and register its pages in `memory`
    pub fn generate(
        workload: &WorkloadConfig,
        seed: u64,
        start: u64,
        len: u64,
        memory: &SimMemory,
        fast: LocationId,
        capacity: LocationId,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let huge = PageSize::Huge.bytes();
        let base = PageSize::Base.bytes();
        let mut slots = Vec::new();
        let mut addr = start;

        let map = |rng: &mut StdRng, addr: u64, size: PageSize| {
            let node = if roll(rng, workload.initial_fast_percent) {
                fast
            } else {
                capacity
            };
            memory.place(addr, node);
            Slot::Page {
                size,
                hot: roll(rng, workload.hot_percent),
            }
        };

        while addr < start + len {
            if addr & (huge - 1) == 0 && addr + huge <= start + len && roll(&mut rng, workload.huge_percent) {
                slots.push(map(&mut rng, addr, PageSize::Huge));
                addr += huge;
                continue;
            }
            if roll(&mut rng, workload.hole_percent) {
                slots.push(Slot::Hole);
            } else {
                slots.push(map(&mut rng, addr, PageSize::Base));
            }
            addr += base;
        }

        Self {
            start,
            slots,
            rng,
            hot_access_percent: workload.hot_access_percent,
            cold_access_percent: workload.cold_access_percent,
        }
    }

    pub fn mapped_pages(&self) -> usize {
        self.slots.iter().filter(|s| **s != Slot::Hole).count()
    }
}

impl PageAccessSource for SimSource {
    fn walk(&mut self, emit: &mut dyn FnMut(AccessEvent)) -> TierResult<()> {
        emit(AccessEvent::Seek(self.start));

        let mut run: Option<(RunKind, u32)> = None;
        for &slot in &self.slots {
            let kind = match slot {
                Slot::Hole => RunKind::Hole {
                    shift: PageSize::Base.shift(),
                },
                Slot::Page { size, hot } => {
                    let odds = if hot {
                        self.hot_access_percent
                    } else {
                        self.cold_access_percent
                    };
                    if roll(&mut self.rng, odds) {
                        RunKind::Accessed(size)
                    } else {
                        RunKind::Idle(size)
                    }
                }
            };
            match &mut run {
                Some((current, count)) if *current == kind && *count < u32::MAX => *count += 1,
                _ => {
                    if let Some((kind, count)) = run.take() {
                        emit(AccessEvent::Run { kind, count });
                    }
                    run = Some((kind, 1));
                }
            }
        }
        if let Some((kind, count)) = run {
            emit(AccessEvent::Run { kind, count });
        }
        Ok(())
    }
}

// ============================================================================
// World
// ============================================================================

/// Every simulated range plus the memory they share
pub struct SimWorld {
    pub memory: Arc<SimMemory>,
    ranges: Vec<(RangeId, u64, u64, SimSource)>,
}

impl SimWorld {
    pub fn build(workload: &WorkloadConfig, topology: &NumaTopology) -> TierResult<Self> {
        workload.validate()?;
        let fast = topology
            .nodes_in(Tier::Fast)
            .next()
            .ok_or_else(|| TierError::Config("no fast-tier node".into()))?;
        let capacity = topology
            .nodes_in(Tier::Capacity)
            .next()
            .ok_or_else(|| TierError::Config("no capacity-tier node".into()))?;

        let memory = Arc::new(SimMemory::new(workload.seed, workload.move_failure_percent));
        let len = workload.range_bytes();
        let mut ranges = Vec::new();
        for pid in 0..workload.processes {
            for index in 0..workload.ranges_per_process {
                let start = SIM_BASE + ((pid as u64) << 36) + ((index as u64) << 32);
                let seed = workload.seed ^ ((pid as u64) << 32 | index as u64);
                let source = SimSource::generate(workload, seed, start, len, &memory, fast, capacity);
                let id = RangeId { pid: pid + 1, index };
                ranges.push((id, start, start + len, source));
            }
        }

        log::info!(
            "[Sim] {} ranges of {} MB, {} pages mapped",
            ranges.len(),
            len >> 20,
            ranges.iter().map(|r| r.3.mapped_pages()).sum::<usize>()
        );
        Ok(Self { memory, ranges })
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Hand every range to `controller`
    pub fn attach(self, controller: &mut CycleController) -> TierResult<Arc<SimMemory>> {
        for (id, start, end, source) in self.ranges {
            controller.add_range(
                id,
                start,
                end,
                Box::new(source),
                self.memory.clone(),
                self.memory.clone(),
            )?;
        }
        Ok(self.memory)
    }
}
