//! Refs-count Histograms
//!
//! `[location class][counter] -> pages`, built in one forward pass over a
//! ledger. Counters above the ledger's walk count land in the top bin.
//!
//! Classes:
//! - one row per configured node
//! - fast tier and capacity tier (sum of their nodes)
//! - unknown (not yet located, or an id outside the topology)
//! - all
//!
//! For every counter value `fast + capacity + unknown == all`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{TierError, TierResult};
use crate::ledger::AddressLedger;
use crate::page::LocationId;
use crate::topology::{NumaTopology, Tier};

/// Row selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationClass {
    Node(LocationId),
    FastTier,
    CapacityTier,
    Unknown,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Histogram {
    walk_count: u8,
    page_shift: u8,
    nodes: BTreeMap<LocationId, Vec<u64>>,
    fast: Vec<u64>,
    capacity: Vec<u64>,
    unknown: Vec<u64>,
    all: Vec<u64>,
}

impl Histogram {
    pub fn new(walk_count: u8, page_shift: u8) -> Self {
        let bins = walk_count as usize + 1;
        Self {
            walk_count,
            page_shift,
            nodes: BTreeMap::new(),
            fast: vec![0; bins],
            capacity: vec![0; bins],
            unknown: vec![0; bins],
            all: vec![0; bins],
        }
    }

    /// Histogram of unlocated pages, `counts[c]` pages at counter `c`
    pub fn from_counts(page_shift: u8, counts: &[u64]) -> Self {
        let walk_count = counts.len().saturating_sub(1).min(u8::MAX as usize) as u8;
        let mut hist = Self::new(walk_count, page_shift);
        for (c, &n) in counts.iter().take(hist.all.len()).enumerate() {
            hist.all[c] = n;
            hist.unknown[c] = n;
        }
        hist
    }

    pub fn walk_count(&self) -> u8 {
        self.walk_count
    }

    pub fn page_shift(&self) -> u8 {
        self.page_shift
    }

    pub fn is_empty(&self) -> bool {
        self.total(LocationClass::All) == 0
    }

    /// Pages of `class` with exactly `counter` observed accesses
    pub fn count(&self, class: LocationClass, counter: usize) -> u64 {
        self.column(class).get(counter).copied().unwrap_or(0)
    }

    /// Row of `class`, indexed by counter. Empty for unseen nodes.
    pub fn column(&self, class: LocationClass) -> &[u64] {
        match class {
            LocationClass::Node(id) => self.nodes.get(&id).map(Vec::as_slice).unwrap_or(&[]),
            LocationClass::FastTier => &self.fast,
            LocationClass::CapacityTier => &self.capacity,
            LocationClass::Unknown => &self.unknown,
            LocationClass::All => &self.all,
        }
    }

    /// Pages in `class`
    pub fn total(&self, class: LocationClass) -> u64 {
        self.column(class).iter().sum()
    }

    /// Bytes in `class`
    pub fn bytes(&self, class: LocationClass) -> u64 {
        self.total(class) << self.page_shift
    }

    /// Pages of `class` with counter in `[lo, hi]`
    pub fn range_total(&self, class: LocationClass, lo: usize, hi: usize) -> u64 {
        let col = self.column(class);
        if lo > hi || lo >= col.len() {
            return 0;
        }
        col[lo..=hi.min(col.len() - 1)].iter().sum()
    }

    /// Fold another histogram of the same page size into this one,
    /// widening to the larger walk count.
    pub fn merge(&mut self, other: &Histogram) -> TierResult<()> {
        if other.page_shift != self.page_shift {
            return Err(TierError::GranularityLocked {
                current: self.page_shift,
                requested: other.page_shift,
            });
        }
        if other.walk_count > self.walk_count {
            self.widen(other.walk_count);
        }

        add_into(&mut self.fast, &other.fast);
        add_into(&mut self.capacity, &other.capacity);
        add_into(&mut self.unknown, &other.unknown);
        add_into(&mut self.all, &other.all);
        for (id, col) in &other.nodes {
            let bins = self.walk_count as usize + 1;
            let row = self.nodes.entry(*id).or_insert_with(|| vec![0; bins]);
            add_into(row, col);
        }
        Ok(())
    }

    fn widen(&mut self, walk_count: u8) {
        let bins = walk_count as usize + 1;
        self.walk_count = walk_count;
        self.fast.resize(bins, 0);
        self.capacity.resize(bins, 0);
        self.unknown.resize(bins, 0);
        self.all.resize(bins, 0);
        for row in self.nodes.values_mut() {
            row.resize(bins, 0);
        }
    }

    fn add(&mut self, tier: Option<Tier>, location: LocationId, counter: usize) {
        self.all[counter] += 1;
        match tier {
            Some(tier) => {
                let bins = self.walk_count as usize + 1;
                self.nodes.entry(location).or_insert_with(|| vec![0; bins])[counter] += 1;
                match tier {
                    Tier::Fast => self.fast[counter] += 1,
                    Tier::Capacity => self.capacity[counter] += 1,
                }
            }
            None => self.unknown[counter] += 1,
        }
    }
}

fn add_into(dst: &mut [u64], src: &[u64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

/// Builds per-ledger histograms against a topology
pub struct HistogramBuilder<'a> {
    topology: &'a NumaTopology,
}

impl<'a> HistogramBuilder<'a> {
    pub fn new(topology: &'a NumaTopology) -> Self {
        Self { topology }
    }

    pub fn build(&self, ledger: &AddressLedger) -> Histogram {
        let walk_count = ledger.walk_count();
        let mut hist = Histogram::new(walk_count, ledger.page_shift());
        for entry in ledger.scan_forward() {
            let counter = entry.counter.min(walk_count) as usize;
            hist.add(self.topology.tier_of(entry.location), entry.location, counter);
        }
        hist
    }
}
