//! Placement Policy
//!
//! Turns refs-count histograms into per-(range, page size) migration
//! parameters:
//!
//! ```text
//!   Histogram ──► ThresholdSelector / calc_round_parameters ──► MigrationParameter
//!                                                                  │
//!                                          AntiThrashGuard ◄───────┘
//! ```
//!
//! Parameters are rebuilt from scratch every cycle.

pub mod budget;
pub mod guard;
pub mod threshold;

pub use budget::calc_round_parameters;
pub use guard::{AntiThrashGuard, GuardOutcome, PolicyStage};
pub use threshold::{QuotaSource, ThresholdPick, ThresholdSelector};

use serde::Serialize;

use crate::histogram::{Histogram, LocationClass};
use crate::page::PageSize;

/// Thresholds and budgets for one (range, page size) in one cycle.
///
/// A page is hot when its clamped counter is above `hot_threshold`, or equal
/// to it while `promote_remain` lasts. Cold mirrors that with
/// `cold_threshold` and `demote_remain`. `hot_threshold = walk_count + 1`
/// and `cold_threshold = -1` select nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationParameter {
    pub page_size: PageSize,
    pub walk_count: u8,
    pub hot_threshold: i32,
    pub cold_threshold: i32,
    /// Bytes selected for promotion
    pub promote_quota: u64,
    /// Bytes selected for demotion
    pub demote_quota: u64,
    /// Pages still takeable from the hot boundary bucket
    pub promote_remain: u64,
    /// Pages still takeable from the cold boundary bucket
    pub demote_remain: u64,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
}

impl MigrationParameter {
    /// Parameter that selects nothing in either direction
    pub fn idle(page_size: PageSize, walk_count: u8) -> Self {
        Self {
            page_size,
            walk_count,
            hot_threshold: walk_count as i32 + 1,
            cold_threshold: -1,
            promote_quota: 0,
            demote_quota: 0,
            promote_remain: 0,
            demote_remain: 0,
            enabled: true,
            disabled_reason: None,
        }
    }

    pub fn gap(&self) -> i32 {
        self.hot_threshold - self.cold_threshold
    }

    pub fn disable(&mut self, reason: String) {
        self.enabled = false;
        self.disabled_reason = Some(reason);
    }

    pub fn selects_hot(&self) -> bool {
        self.enabled && self.hot_threshold <= self.walk_count as i32
    }

    pub fn selects_cold(&self) -> bool {
        self.enabled && self.cold_threshold >= 0
    }

    /// Take the whole hot boundary bucket at the current threshold
    pub fn refill_promote(&mut self, hist: &Histogram) {
        if self.hot_threshold > self.walk_count as i32 {
            self.promote_remain = 0;
            self.promote_quota = 0;
            return;
        }
        let t = self.hot_threshold.max(0) as usize;
        let pages = hist.range_total(LocationClass::All, t, self.walk_count as usize);
        self.promote_remain = hist.count(LocationClass::All, t);
        self.promote_quota = pages << self.page_size.shift();
    }

    /// Take the whole cold boundary bucket at the current threshold
    pub fn refill_demote(&mut self, hist: &Histogram) {
        if self.cold_threshold < 0 {
            self.demote_remain = 0;
            self.demote_quota = 0;
            return;
        }
        let t = self.cold_threshold as usize;
        let pages = hist.range_total(LocationClass::All, 0, t);
        self.demote_remain = hist.count(LocationClass::All, t);
        self.demote_quota = pages << self.page_size.shift();
    }
}
