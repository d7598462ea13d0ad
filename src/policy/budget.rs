//! Global Budget Split
//!
//! One byte budget for hot and one for cold, shared by every tracked range
//! of every process. Buckets are visited from the hottest (or coldest)
//! counter outward; within a counter, ranges are served in iteration order
//! and the last one served may get only part of its bucket.
//!
//! Iteration order rather than value order decides who gets a split bucket.
//! That is accepted: the error is at most one bucket per cycle.

use crate::histogram::{Histogram, LocationClass};
use crate::page::PageSize::{self, Base, Huge};

use super::{MigrationParameter, QuotaSource, ThresholdSelector};

/// Histograms of one tracked range, indexed by [`PageSize::index`]
pub type RangeHistograms = [Histogram; 2];

/// Parameters of one tracked range, indexed by [`PageSize::index`]
pub type RangeParameters = [MigrationParameter; 2];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Hot,
    Cold,
}

/// Compute every range's parameters for this cycle.
///
/// A [`QuotaSource::FixedRange`] has no budget to split, so each range gets
/// its own fixed thresholds.
pub fn calc_round_parameters(ranges: &[RangeHistograms], source: &QuotaSource) -> Vec<RangeParameters> {
    let mut params: Vec<RangeParameters> = ranges
        .iter()
        .map(|hists| {
            [
                MigrationParameter::idle(Base, hists[Base.index()].walk_count()),
                MigrationParameter::idle(Huge, hists[Huge.index()].walk_count()),
            ]
        })
        .collect();

    if let QuotaSource::FixedRange { .. } = source {
        for (param, hists) in params.iter_mut().zip(ranges) {
            for size in PageSize::ALL {
                param[size.index()] = ThresholdSelector::for_range(&hists[size.index()], size, source);
            }
        }
        return params;
    }

    let total: u64 = ranges
        .iter()
        .flat_map(|hists| hists.iter())
        .map(|h| h.bytes(LocationClass::All))
        .sum();
    let hot_budget = source.hot_bytes(total).unwrap_or(0);
    let cold_budget = source.cold_bytes(total).unwrap_or(0);

    let left = distribute(ranges, &mut params, Side::Hot, hot_budget);
    if left > 0 {
        log::warn!(
            "[Policy] hot budget underflow: requested {} KB, found {} KB",
            hot_budget >> 10,
            (hot_budget - left) >> 10
        );
    }
    let left = distribute(ranges, &mut params, Side::Cold, cold_budget);
    if left > 0 {
        log::warn!(
            "[Policy] cold budget underflow: requested {} KB, found {} KB",
            cold_budget >> 10,
            (cold_budget - left) >> 10
        );
    }

    log::info!(
        "[Policy] budget split over {} ranges: total {} KB, hot {} KB, cold {} KB",
        ranges.len(),
        total >> 10,
        hot_budget >> 10,
        cold_budget >> 10
    );
    params
}

/// Hand out `budget` bytes bucket by bucket. Returns the unused bytes.
fn distribute(ranges: &[RangeHistograms], params: &mut [RangeParameters], side: Side, mut budget: u64) -> u64 {
    let max_walks = ranges
        .iter()
        .flat_map(|hists| hists.iter())
        .map(|h| h.walk_count())
        .max()
        .unwrap_or(0) as i32;

    let counters: Vec<i32> = match side {
        Side::Hot => (1..=max_walks).rev().collect(),
        Side::Cold => (0..max_walks).collect(),
    };
    // a range whose boundary bucket was split takes nothing further out
    let mut closed = vec![[false; 2]; ranges.len()];

    for counter in counters {
        for (r, hists) in ranges.iter().enumerate() {
            for size in PageSize::ALL {
                if budget == 0 {
                    return 0;
                }
                let i = size.index();
                if closed[r][i] {
                    continue;
                }
                let hist = &hists[i];
                if counter > hist.walk_count() as i32 {
                    continue;
                }
                let pages = hist.count(LocationClass::All, counter as usize);
                if pages == 0 {
                    continue;
                }

                let shift = size.shift();
                let bytes = pages << shift;
                let (taken, split) = if bytes <= budget {
                    (pages, false)
                } else {
                    (budget >> shift, true)
                };
                if taken == 0 {
                    // page larger than what is left; smaller pages may still fit
                    continue;
                }

                let param = &mut params[r][i];
                match side {
                    Side::Hot => {
                        param.hot_threshold = counter;
                        param.promote_remain = taken;
                        param.promote_quota += taken << shift;
                    }
                    Side::Cold => {
                        param.cold_threshold = counter;
                        param.demote_remain = taken;
                        param.demote_quota += taken << shift;
                    }
                }
                budget -= taken << shift;
                closed[r][i] = split;
            }
        }
    }
    budget
}
